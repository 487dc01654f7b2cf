use tracing::{info, warn};

use super::WorkerContext;
use crate::core::scenario::ScenarioUnit;
use crate::error::Result;
use crate::orchestration::barrier::PhaseBarrier;

/// Write `title.txt` for one scenario. Returns false when the language has
/// no title prompt and the scenario keeps its default video name.
pub async fn generate_title(ctx: WorkerContext, unit: ScenarioUnit) -> Result<bool> {
    ctx.checkpoint()?;
    let Some(prompt) = unit.language.title_prompt.as_deref().filter(|p| !p.trim().is_empty()) else {
        warn!(lang = %unit.lang_id, scenario = %unit.name(), "no title prompt, skipping title");
        return Ok(false);
    };

    let scenario = tokio::fs::read_to_string(unit.scenario_file()).await?;
    let model = ctx.settings.api.openrouter.primary_model()?.clone();
    ctx.reporter
        .status(unit.lang_index, format!("✍️ Title for {}", unit.name()));

    let title = ctx
        .client("openrouter")
        .call("title", || ctx.services.text.generate(prompt, &scenario, &model))
        .await?;
    tokio::fs::write(unit.title_file(), title.trim()).await?;
    info!(scenario = %unit.name(), lang = %unit.lang_id, "title generated");
    Ok(true)
}

/// Titles for every scenario, one worker each on the general pool.
pub async fn generate_titles(ctx: &WorkerContext, units: &[ScenarioUnit]) -> Result<usize> {
    let report = PhaseBarrier::run(
        "titles",
        &ctx.pools.general,
        units.to_vec(),
        &ctx.cancel,
        ctx.poll(),
        |_, unit| generate_title(ctx.clone(), unit),
    )
    .await?;
    let written = report.into_values()?.into_iter().filter(|w| *w).count();
    Ok(written)
}
