use std::collections::BTreeMap;

use serde_json::{json, Value};
use tracing::{debug, info};

use super::{contain, PipelineContext};
use crate::error::MigrateError;
use crate::error::MigrateResult;
use crate::mapping::OptionResolver;
use crate::payload::ProductBuilder;
use crate::record::{scalar_to_string, value_as_i64, ProductRecord};
use crate::report::RunReport;
use crate::target::StoreScope;
use crate::writer::Resource;

fn is_configurable(summary: &Value) -> bool {
    summary.get("type").and_then(Value::as_str) == Some("configurable")
}

/// Default-scope products, or with `store_views` the per-store payloads.
///
/// Configurable parents are processed after everything else so their
/// children already exist on the target when links are resolved.
pub async fn run(
    ctx: &PipelineContext<'_>,
    report: &mut RunReport,
    store_views: bool,
) -> MigrateResult<()> {
    let Some(mut list) = contain(
        ctx.source.api().product_list().await,
        report,
        "product list",
        "all",
    )?
    else {
        return Ok(());
    };
    list.sort_by_key(is_configurable);

    let skus: BTreeMap<i64, String> = list
        .iter()
        .filter_map(|p| {
            let id = p.get("product_id").and_then(value_as_i64)?;
            let sku = p.get("sku").and_then(scalar_to_string)?;
            Some((id, sku))
        })
        .collect();
    info!(products = list.len(), store_views, "products: list loaded");

    let store = ctx.source.store();
    let website_stores = if store_views {
        let Some(ws) = contain(store.website_stores().await, report, "core_store", "all")? else {
            return Ok(());
        };
        ws
    } else {
        BTreeMap::new()
    };

    let resolver = OptionResolver::new(store, ctx.target, &ctx.cfg.transfer.option_attributes);
    let builder = ProductBuilder {
        cfg: ctx.cfg,
        mapper: ctx.mapper(),
        store,
        target: ctx.target,
        options: &resolver,
        assets: ctx.assets,
        skus: &skus,
    };

    for summary in &list {
        let Some(entity) = ctx.source.read_product(summary).await? else {
            report.record_skip("product");
            continue;
        };
        if let Some(err) = &entity.api_error {
            report.record_partial("product", entity.id, err);
        }
        let rec = ProductRecord::from_entity(&entity);
        let key = rec
            .sku
            .clone()
            .unwrap_or_else(|| rec.product_id.to_string());

        if store_views {
            let Some(views) = contain(
                builder.build_store_views(&rec, &website_stores, report).await,
                report,
                "product store view",
                &key,
            )?
            else {
                continue;
            };
            debug!(sku = %key, views = views.len(), "products: store views built");
            for view in views {
                let scope = StoreScope::Store(view.target_store_id);
                if !ctx.target.has_scope(scope) {
                    report.record_failure(
                        "product store view",
                        &format!("{key}@{scope}"),
                        &MigrateError::Write {
                            entity: "store endpoint",
                            key: view.target_store_id.to_string(),
                            reason: "no REST endpoint configured".into(),
                        },
                    );
                    continue;
                }
                let resource = Resource::Product {
                    sku: view.sku,
                    scope,
                };
                let body = json!({"product": view.product, "saveOptions": true});
                ctx.submit(&resource, body, report).await?;
            }
        } else {
            let Some(built) = contain(
                builder.build_default(&rec, report).await,
                report,
                "product",
                &key,
            )?
            else {
                continue;
            };
            let Some(product) = built else {
                report.record_skip("product");
                continue;
            };
            let resource = Resource::Product {
                sku: key.clone(),
                scope: StoreScope::Default,
            };
            let body = json!({"product": product, "saveOptions": true});
            ctx.submit(&resource, body, report).await?;
        }
    }
    Ok(())
}
