use serde_json::Value;
use tracing::{debug, info};

use super::{contain, PipelineContext, Submitted};
use crate::error::{Dimension, MigrateResult};
use crate::payload::{build_assignment_payload, build_attribute_payload, build_group_payload};
use crate::record::{scalar_to_string, AttributeRecord};
use crate::report::RunReport;
use crate::writer::Resource;

/// Per source set: groups, then the attributes of each group (by code),
/// then the set/group assignment.
pub async fn run(ctx: &PipelineContext<'_>, report: &mut RunReport) -> MigrateResult<()> {
    let mapper = ctx.mapper();
    let store = ctx.source.store();

    for source_set in ctx.cfg.source_attribute_sets() {
        let Some(target_set) =
            mapper.map_or_report(Dimension::AttributeSet, source_set, "attributes", report)
        else {
            report.record_skip("attribute set");
            continue;
        };
        let set_key = source_set.to_string();
        let Some(groups) = contain(
            store.attribute_groups(source_set).await,
            report,
            "attribute set",
            &set_key,
        )?
        else {
            continue;
        };
        info!(source_set, target_set, groups = groups.len(), "attributes: set");

        for group in groups {
            let resource = Resource::Group {
                set_id: target_set,
                name: group.attribute_group_name.clone(),
            };
            let target_group = ctx
                .submit(&resource, build_group_payload(&group, target_set), report)
                .await?;

            let group_key = format!("{source_set}/{}", group.attribute_group_name);
            let Some(mut rows) = contain(
                store
                    .group_attributes(source_set, group.attribute_group_id)
                    .await,
                report,
                "attribute group",
                &group_key,
            )?
            else {
                continue;
            };
            rows.sort_by_key(|r| r.get("attribute_code").and_then(scalar_to_string));
            debug!(group = %group_key, attributes = rows.len(), "attributes: group rows");

            for row in rows {
                migrate_attribute(ctx, &row, target_set, target_group, report).await?;
            }
        }
    }
    Ok(())
}

async fn migrate_attribute(
    ctx: &PipelineContext<'_>,
    row: &serde_json::Map<String, Value>,
    target_set: i64,
    target_group: Submitted,
    report: &mut RunReport,
) -> MigrateResult<()> {
    let Some(entity) = ctx.source.read_attribute(row).await? else {
        report.record_skip("attribute");
        return Ok(());
    };
    if let Some(err) = &entity.api_error {
        report.record_partial("attribute", entity.id, err);
    }
    let rec = AttributeRecord::from_entity(&entity);
    if rec.attribute_code.is_empty() {
        report.record_skip("attribute");
        return Ok(());
    }

    let resource = Resource::Attribute {
        code: rec.attribute_code.clone(),
    };
    let created = ctx
        .submit(&resource, build_attribute_payload(&rec, &ctx.cfg.transfer), report)
        .await?;

    match (created, target_group) {
        (Submitted::Written(_), Submitted::Written(group_id)) => {
            let body = build_assignment_payload(&rec, target_set, group_id);
            let result = ctx.writer().assign_attribute(&rec.attribute_code, &body).await?;
            report.record_result("attribute assignment", &rec.attribute_code, &result);
        }
        (Submitted::DryRun, _) => {
            debug!(code = %rec.attribute_code, target_set, "dry run: assignment not sent");
            report.record_dry_run("attribute assignment");
        }
        _ => report.record_skip("attribute assignment"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MappingTables;
    use crate::pipeline::{run as run_pipeline, Pipeline};
    use crate::source::{AttributeGroupRow, SourceReader};
    use crate::testing::{test_config, FakeAssets, FakeSource, FakeStore, FakeTarget};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn store() -> FakeStore {
        FakeStore::default()
            .with_group(
                22,
                AttributeGroupRow {
                    attribute_group_id: 7,
                    attribute_group_name: "General".into(),
                    sort_order: 1,
                },
                vec![
                    json!({"attribute_id": "92", "attribute_code": "size", "frontend_input": "select"}),
                    json!({"attribute_id": "81", "attribute_code": "color", "frontend_input": "select"}),
                ],
            )
            .with_option_labels(81, &["Red"])
    }

    fn tables() -> MappingTables {
        MappingTables {
            version: 1,
            attribute_sets: BTreeMap::from([(22, 10)]),
            ..MappingTables::default()
        }
    }

    #[tokio::test]
    async fn creates_group_then_attributes_by_code_then_assigns() {
        let cfg = test_config(tables());
        let api = FakeSource::default();
        let store = store();
        let target = FakeTarget::default();
        let assets = FakeAssets::default();
        let ctx = PipelineContext {
            cfg: &cfg,
            source: SourceReader::new(&api, &store),
            target: &target,
            assets: &assets,
            dry_run: false,
        };
        let report = run_pipeline(&ctx, Pipeline::Attributes).await.unwrap();

        assert_eq!(report.counts("attribute group").created, 1);
        assert_eq!(report.counts("attribute").created, 2);
        assert_eq!(report.counts("attribute assignment").created, 2);
        assert!(report.partial_records.is_empty());

        let posted: Vec<String> = target
            .bodies("POST", "/products/attributes")
            .iter()
            .map(|b| b["attribute"]["attribute_code"].as_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(posted, vec!["color", "size"]);

        let assignment = target.last("POST", "/products/attribute-sets/attributes").unwrap();
        assert_eq!(assignment["attributeSetId"], 10);
        assert_eq!(assignment["attributeCode"], "size");
    }

    #[tokio::test]
    async fn dry_run_writes_nothing() {
        let cfg = test_config(tables());
        let api = FakeSource::default();
        let store = store();
        let target = FakeTarget::default();
        let assets = FakeAssets::default();
        let ctx = PipelineContext {
            cfg: &cfg,
            source: SourceReader::new(&api, &store),
            target: &target,
            assets: &assets,
            dry_run: true,
        };
        let report = run_pipeline(&ctx, Pipeline::Attributes).await.unwrap();
        assert_eq!(report.counts("attribute").dry_run, 2);
        assert_eq!(report.counts("attribute group").dry_run, 1);
        assert!(target.requests().is_empty());
    }

    #[tokio::test]
    async fn unmapped_set_is_skipped_and_reported() {
        let mut cfg = test_config(tables());
        cfg.transfer.attribute_sets = vec![41];
        let api = FakeSource::default();
        let store = store();
        let target = FakeTarget::default();
        let assets = FakeAssets::default();
        let ctx = PipelineContext {
            cfg: &cfg,
            source: SourceReader::new(&api, &store),
            target: &target,
            assets: &assets,
            dry_run: false,
        };
        let report = run_pipeline(&ctx, Pipeline::Attributes).await.unwrap();
        assert_eq!(report.counts("attribute set").skipped, 1);
        assert_eq!(report.unresolved_mappings[0].source_id, 41);
        assert!(target.requests().is_empty());
    }
}
