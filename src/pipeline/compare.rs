use std::collections::BTreeSet;

use serde_json::Value;
use tracing::info;

use super::{contain, PipelineContext};
use crate::error::{Dimension, MigrateError, MigrateResult};
use crate::record::scalar_to_string;
use crate::report::{RunReport, SetComparison};
use crate::target::StoreScope;

fn codes(items: &[Value], key: &str) -> BTreeSet<String> {
    items
        .iter()
        .filter_map(|i| i.get(key).and_then(scalar_to_string))
        .filter(|c| !c.is_empty())
        .collect()
}

pub fn compare_sets(
    source_set_id: i64,
    target_set_id: i64,
    source: &BTreeSet<String>,
    target: &BTreeSet<String>,
) -> SetComparison {
    SetComparison {
        source_set_id,
        target_set_id,
        source_count: source.len(),
        target_count: target.len(),
        shared: source.intersection(target).cloned().collect(),
        source_only: source.difference(target).cloned().collect(),
        target_only: target.difference(source).cloned().collect(),
    }
}

/// Attribute codes per mapped set on both sides. Read-only.
pub async fn run(ctx: &PipelineContext<'_>, report: &mut RunReport) -> MigrateResult<()> {
    let mapper = ctx.mapper();
    for source_set in ctx.cfg.source_attribute_sets() {
        let Some(target_set) =
            mapper.map_or_report(Dimension::AttributeSet, source_set, "compare", report)
        else {
            report.record_skip("attribute set");
            continue;
        };
        let key = format!("{source_set}->{target_set}");
        let Some(source_items) = contain(
            ctx.source.api().attribute_list(source_set).await,
            report,
            "attribute set",
            &key,
        )?
        else {
            continue;
        };

        let path = format!("/products/attribute-sets/{target_set}/attributes");
        let reply = ctx.target.get(StoreScope::Default, &path, &[]).await?;
        let target_items = match (&reply.body, reply.is_success()) {
            (Value::Array(items), true) => items.clone(),
            _ => {
                report.record_failure(
                    "attribute set",
                    &key,
                    &MigrateError::fetch(
                        "target attribute set",
                        target_set,
                        format!("{} {}", reply.status, reply.error_text()),
                    ),
                );
                continue;
            }
        };

        let cmp = compare_sets(
            source_set,
            target_set,
            &codes(&source_items, "code"),
            &codes(&target_items, "attribute_code"),
        );
        info!(
            source_set,
            target_set,
            source_count = cmp.source_count,
            target_count = cmp.target_count,
            shared = cmp.shared.len(),
            source_only = ?cmp.source_only,
            target_only = ?cmp.target_only,
            "compare: attribute set"
        );
        report.comparisons.push(cmp);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MappingTables;
    use crate::pipeline::{run as run_pipeline, Pipeline};
    use crate::source::SourceReader;
    use crate::testing::{test_config, FakeAssets, FakeSource, FakeStore, FakeTarget};
    use serde_json::json;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn reports_shared_and_one_sided_codes() {
        let cfg = test_config(MappingTables {
            attribute_sets: BTreeMap::from([(22, 10)]),
            ..MappingTables::default()
        });
        let api = FakeSource::default().with_attribute_list(
            22,
            json!([{"attribute_id": "81", "code": "color"}, {"attribute_id": "92", "code": "size"}]),
        );
        let store = FakeStore::default();
        let target = FakeTarget::default().with_set_attributes(
            10,
            json!([{"attribute_code": "color"}, {"attribute_code": "quantity_and_stock_status"}]),
        );
        let assets = FakeAssets::default();
        let ctx = PipelineContext {
            cfg: &cfg,
            source: SourceReader::new(&api, &store),
            target: &target,
            assets: &assets,
            dry_run: false,
        };
        let report = run_pipeline(&ctx, Pipeline::Compare).await.unwrap();

        let cmp = &report.comparisons[0];
        assert_eq!((cmp.source_count, cmp.target_count), (2, 2));
        assert_eq!(cmp.shared, vec!["color"]);
        assert_eq!(cmp.source_only, vec!["size"]);
        assert_eq!(cmp.target_only, vec!["quantity_and_stock_status"]);
        assert!(target.requests().iter().all(|r| r.method == "GET"));
    }
}
