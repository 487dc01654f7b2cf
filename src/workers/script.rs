use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use super::{Lane, WorkerContext};
use crate::core::scenario::{split_scenarios, ScenarioUnit};
use crate::error::{Error, Result};

const SOURCE_FILES: [&str; 2] = ["rewritten_text.txt", "translation.txt"];

async fn read_source(lang_dir: &Path, lang_id: &str) -> Result<String> {
    for name in SOURCE_FILES {
        let path = lang_dir.join(name);
        if tokio::fs::try_exists(&path).await? {
            return Ok(tokio::fs::read_to_string(&path).await?);
        }
    }
    Err(Error::LocalInput(format!(
        "no source text for '{}' in {}",
        lang_id,
        lang_dir.display()
    )))
}

/// Produce the scenario units of every lane, one language after the other.
///
/// Each language gets one LLM call splitting its source text into numbered
/// scenarios, then one call per scenario for the raw image prompt list.
pub async fn generate_scripts(
    ctx: &WorkerContext,
    work_dir: &Path,
    lanes: &[Lane],
) -> Result<Vec<ScenarioUnit>> {
    let model = ctx.settings.api.openrouter.primary_model()?.clone();
    let client = ctx.client("openrouter");
    let mut units = Vec::new();

    for lane in lanes {
        ctx.checkpoint()?;
        let name = &lane.config.name;
        ctx.reporter
            .status(lane.index, format!("📝 Scenarios for '{}'", name));
        info!(task = %ctx.task_id, lang = %lane.id, "generating scenarios");

        let lang_dir = work_dir.join(&lane.id);
        let source = read_source(&lang_dir, &lane.id).await?;
        let response = client
            .call("scenarios", || {
                ctx.services
                    .text
                    .generate(&lane.config.scenario_prompt, &source, &model)
            })
            .await?;

        let scenarios = split_scenarios(&response);
        if scenarios.is_empty() {
            return Err(Error::LocalInput(format!(
                "no scenarios parsed from the response for '{}'",
                lane.id
            )));
        }
        info!(task = %ctx.task_id, lang = %lane.id, count = scenarios.len(), "scenarios generated");

        let shorts = lang_dir.join("shorts");
        for (i, text) in scenarios.iter().enumerate() {
            ctx.checkpoint()?;
            let number = i + 1;
            let unit = ScenarioUnit {
                task_id: ctx.task_id,
                lang_index: lane.index,
                lang_id: lane.id.clone(),
                language: Arc::clone(&lane.config),
                settings: Arc::clone(&ctx.settings),
                path: shorts.join(format!("scenario_{}", number)),
                number,
            };
            tokio::fs::create_dir_all(&unit.path).await?;
            tokio::fs::write(unit.scenario_file(), text).await?;

            ctx.reporter
                .status(lane.index, format!("📝 Image prompts for scenario {}", number));
            let prompts = client
                .call("image prompts", || {
                    ctx.services
                        .text
                        .generate(&lane.config.image_prompt_prompt, text, &model)
                })
                .await?;
            if prompts.trim().is_empty() {
                warn!(scenario = %unit.name(), lang = %lane.id, "empty image prompt response");
            }
            tokio::fs::write(unit.prompts_file(), prompts).await?;
            units.push(unit);
        }
    }
    Ok(units)
}
