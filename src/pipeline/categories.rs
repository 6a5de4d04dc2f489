use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{info, warn};

use super::{contain, PipelineContext, Submitted};
use crate::error::{Dimension, MigrateError, MigrateResult};
use crate::payload::{build_category_attributes_payload, build_category_payload};
use crate::record::{value_as_i64, CategoryRecord};
use crate::report::RunReport;
use crate::writer::Resource;

/// Pre-order search of the category tree.
pub fn find_node(node: &Value, category_id: i64) -> Option<&Value> {
    if node.get("category_id").and_then(value_as_i64) == Some(category_id) {
        return Some(node);
    }
    children(node)
        .iter()
        .find_map(|child| find_node(child, category_id))
}

fn children(node: &Value) -> &[Value] {
    node.get("children")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn subtree_size(node: &Value) -> usize {
    1 + children(node).iter().map(subtree_size).sum::<usize>()
}

/// Copy the configured subtrees. Roots go under `category_parent_id`,
/// children under their freshly created parent. A node that fails takes
/// its whole subtree with it.
pub async fn run(ctx: &PipelineContext<'_>, report: &mut RunReport) -> MigrateResult<()> {
    let Some(tree) = contain(
        ctx.source.api().category_tree().await,
        report,
        "category tree",
        "root",
    )?
    else {
        return Ok(());
    };

    let roots: Vec<&Value> = if ctx.cfg.transfer.category_roots.is_empty() {
        children(&tree).iter().collect()
    } else {
        ctx.cfg
            .transfer
            .category_roots
            .iter()
            .filter_map(|id| {
                let node = find_node(&tree, *id);
                if node.is_none() {
                    report.record_failure(
                        "category",
                        &id.to_string(),
                        &MigrateError::fetch("category", id, "root not found in tree"),
                    );
                }
                node
            })
            .collect()
    };

    // Explicit stack keeps the walk pre-order without async recursion.
    let mut stack: Vec<(&Value, i64)> = roots
        .into_iter()
        .rev()
        .map(|n| (n, ctx.cfg.transfer.category_parent_id))
        .collect();

    while let Some((node, parent_id)) = stack.pop() {
        let next_parent = match transfer_node(ctx, node, parent_id, report).await? {
            Submitted::Written(id) => id,
            // Children are still built so the dry run shows the whole tree.
            Submitted::DryRun => 0,
            Submitted::Failed => {
                let skipped = subtree_size(node) - 1;
                if skipped > 0 {
                    warn!(category = ?node.get("category_id"), skipped, "categories: skipping subtree");
                }
                for _ in 0..skipped {
                    report.record_skip("category");
                }
                continue;
            }
        };
        for child in children(node).iter().rev() {
            stack.push((child, next_parent));
        }
    }
    info!(mapped = report.category_map.len(), "categories: tree done");
    Ok(())
}

async fn transfer_node(
    ctx: &PipelineContext<'_>,
    node: &Value,
    parent_id: i64,
    report: &mut RunReport,
) -> MigrateResult<Submitted> {
    let Some(entity) = ctx.source.read_category(node).await? else {
        report.record_skip("category");
        return Ok(Submitted::Failed);
    };
    if let Some(err) = &entity.api_error {
        report.record_partial("category", entity.id, err);
    }
    let rec = CategoryRecord::from_entity(&entity);
    let resource = Resource::Category {
        name: rec.name.clone().unwrap_or_default(),
        parent_id,
    };
    let body = build_category_payload(&rec, parent_id, &ctx.cfg.transfer.category_attribute_codes);
    let submitted = ctx.submit(&resource, body, report).await?;
    if let Submitted::Written(target_id) = submitted {
        report.record_category(rec.category_id, target_id);
    }
    Ok(submitted)
}

/// Admin-store values of user-defined category attributes, one `PUT` per
/// mapped category.
pub async fn run_attributes(ctx: &PipelineContext<'_>, report: &mut RunReport) -> MigrateResult<()> {
    let mapper = ctx.mapper();
    let Some(rows) = contain(
        ctx.source.store().category_attribute_values().await,
        report,
        "category attributes",
        "all",
    )?
    else {
        return Ok(());
    };

    let mut by_category: BTreeMap<i64, Vec<(String, Value)>> = BTreeMap::new();
    for row in rows {
        let Some(value) = row.value else { continue };
        by_category
            .entry(row.category_id)
            .or_default()
            .push((row.attribute_code, Value::String(value)));
    }
    info!(categories = by_category.len(), "category attributes: loaded");

    let writer = ctx.writer();
    for (source_id, values) in by_category {
        let Some(target_id) = mapper.map_or_report(
            Dimension::Category,
            source_id,
            "category attributes",
            report,
        ) else {
            report.record_skip("category attributes");
            continue;
        };
        let body = build_category_attributes_payload(target_id, &values);
        if ctx.dry_run {
            info!(source_id, target_id, payload = %body, "dry run: payload built");
            report.record_dry_run("category attributes");
            continue;
        }
        let result = writer.update_category(target_id, &body).await?;
        report.record_result("category attributes", &source_id.to_string(), &result);
    }
    Ok(())
}
