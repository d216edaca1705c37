//! Chapter 7: the appendix.
//!
//! 7.1 lists the submitted reference documents deterministically. 7.2
//! (deviations and recommendations) is populated by the report assembler
//! from the central findings file, not here.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{StageContext, StageError, StageName, StageRunner};
use crate::store::ObjectStore;

pub struct Chapter7Runner;

#[async_trait]
impl StageRunner for Chapter7Runner {
    fn name(&self) -> StageName {
        StageName::Chapter7
    }

    async fn run(&self, ctx: &StageContext, _force: bool) -> Result<Value, StageError> {
        let keys = ctx.store.list(&ctx.config.source_prefix)?;
        let rows: Vec<Value> = keys
            .iter()
            .filter(|k| k.rsplit('/').next().is_some_and(|n| n.contains('.')))
            .enumerate()
            .map(|(i, key)| {
                let filename = key.rsplit('/').next().unwrap_or(key);
                json!({
                    "nr": format!("A.{i}"),
                    "kurzbezeichnung": filename,
                    "dateiname": key,
                    "relevante_aenderungen": "Initial eingereicht für das Audit.",
                })
            })
            .collect();

        tracing::info!(documents = rows.len(), "generated reference document table");
        Ok(json!({ "referenzdokumente": { "table": { "rows": rows } } }))
    }
}
