//! Per-attempt orchestration.
//!
//! A `JobRunner` owns one execution attempt end to end: working directory
//! lifecycle, script rendering, materialize → supervise → collect. The live
//! process handle never leaves the runner; node documents stay freely
//! serializable.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use weir_core::config::AppConfig;
use weir_core::error::{Result, WeirError};
use weir_core::lifecycle::validate_for_run;
use weir_core::node::{FileType, Node, ParameterValue, PARAM_CMD};
use weir_core::traits::ResourceStore;

use crate::collect::Collector;
use crate::materialize::{MaterializedSlot, Materializer, Workspace};
use crate::params::{render_parameters, ParamMode};
use crate::supervisor::{JobOutcome, Supervisor, TerminateHandle};

pub struct JobRunner {
    materializer: Materializer,
    supervisor: Supervisor,
    collector: Collector,
    workspace: Workspace,
}

impl JobRunner {
    /// Build a runner for one execution attempt.
    ///
    /// Configuration is passed in explicitly; the runner reads no ambient
    /// global state.
    pub fn new(store: Arc<dyn ResourceStore>, config: &AppConfig) -> Result<Self> {
        Ok(Self {
            materializer: Materializer::new(Arc::clone(&store), config.cloud.clone()),
            supervisor: Supervisor::new(&config.worker)?,
            collector: Collector::new(store),
            workspace: Workspace::new(&config.worker.tmp_dir()),
        })
    }

    pub fn workdir(&self) -> &Path {
        &self.workspace.workdir
    }

    /// Handle for external cancellation of the attempt's process group.
    pub fn terminate_handle(&self) -> TerminateHandle {
        self.supervisor.terminate_handle()
    }

    /// Execute the node's command and persist produced artifacts.
    ///
    /// Returns the structured outcome; the only node mutations are the
    /// resource identifiers bound onto outputs and logs.
    pub async fn run(&self, node: &mut Node) -> Result<JobOutcome> {
        let result = self.run_inner(node).await;
        self.workspace.clean_up().await;
        result
    }

    async fn run_inner(&self, node: &mut Node) -> Result<JobOutcome> {
        let errors = validate_for_run(node);
        if !errors.is_empty() {
            let joined = errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(WeirError::Validation(joined));
        }

        self.workspace.init().await?;

        let inputs = self
            .materializer
            .prepare_inputs(&node.inputs, &self.workspace, false)
            .await?;
        let (output_paths, cloud_outputs) = self
            .materializer
            .prepare_outputs(&node.outputs, &self.workspace, false)
            .await?;
        let log_paths = self.materializer.prepare_logs(&node.logs, &self.workspace);

        let script = render_script(node, &inputs, &output_paths, &cloud_outputs, &log_paths)?;
        let script_path = self.workspace.script_path();
        tokio::fs::write(&script_path, &script).await?;

        // Mutation-safe copy of the parent environment, never shared.
        let env: HashMap<String, String> = std::env::vars().collect();
        let outcome = self
            .supervisor
            .run(&script_path, &self.workspace.workdir, env, &log_paths)
            .await;

        // Collect regardless of outcome: partial artifacts and logs from a
        // failed run are still wanted for diagnosis.
        self.collector.collect_outputs(node, &output_paths).await?;
        self.collector.collect_logs(node, &log_paths).await?;

        info!(node_id = %node.id, outcome = ?outcome, "job attempt finished");
        Ok(outcome)
    }

    /// Render the command script without touching the store or launching
    /// anything; paths are synthetic.
    pub async fn preview(&self, node: &Node) -> Result<String> {
        let inputs = self
            .materializer
            .prepare_inputs(&node.inputs, &self.workspace, true)
            .await?;
        let (output_paths, cloud_outputs) = self
            .materializer
            .prepare_outputs(&node.outputs, &self.workspace, true)
            .await?;
        let log_paths = self.materializer.prepare_logs(&node.logs, &self.workspace);

        render_script(node, &inputs, &output_paths, &cloud_outputs, &log_paths)
    }
}

/// Single-quote a value for safe use in a shell assignment.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Render the executable script for a node.
///
/// The prologue binds effective parameters, input paths, output paths, and
/// log paths as shell variables (cloud-resolved slots additionally as
/// `<name>_cloud`), then the `cmd` parameter's text follows verbatim.
pub fn render_script(
    node: &Node,
    inputs: &HashMap<String, MaterializedSlot>,
    outputs: &HashMap<String, PathBuf>,
    cloud_outputs: &HashMap<String, String>,
    logs: &HashMap<String, PathBuf>,
) -> Result<String> {
    let cmd = match node.get_parameter(PARAM_CMD).map(|p| &p.value) {
        Some(ParameterValue::Text(text)) => text.clone(),
        Some(ParameterValue::Code(code)) => code.value.clone(),
        Some(_) => {
            return Err(WeirError::Materialize(format!(
                "parameter `{}` must be TEXT or CODE",
                PARAM_CMD
            )))
        }
        None => {
            return Err(WeirError::Materialize(format!(
                "node has no `{}` parameter",
                PARAM_CMD
            )))
        }
    };

    let rendered = render_parameters(&node.parameters, ParamMode::Flattened);
    let mut script = String::from("#!/bin/bash\nset -e\n");

    script.push_str("\n# parameters\n");
    for parameter in &node.parameters {
        if parameter.name == PARAM_CMD {
            continue;
        }
        if let Some(value) = rendered.get(&parameter.name) {
            script.push_str(&format!(
                "{}={}\n",
                parameter.name,
                shell_quote(&value.flatten())
            ));
        }
    }

    script.push_str("\n# inputs\n");
    for input in &node.inputs {
        if let Some(slot) = inputs.get(&input.name) {
            script.push_str(&format!(
                "{}={}\n",
                input.name,
                shell_quote(&slot.flatten_paths())
            ));
            if input.accepts(FileType::CloudStorage) {
                script.push_str(&format!(
                    "{}_cloud={}\n",
                    input.name,
                    shell_quote(&slot.flatten_cloud())
                ));
            }
        }
    }

    script.push_str("\n# outputs\n");
    for output in &node.outputs {
        if let Some(path) = outputs.get(&output.name) {
            script.push_str(&format!(
                "{}={}\n",
                output.name,
                shell_quote(&path.display().to_string())
            ));
        }
        if let Some(cloud_path) = cloud_outputs.get(&output.name) {
            script.push_str(&format!(
                "{}_cloud={}\n",
                output.name,
                shell_quote(cloud_path)
            ));
        }
    }

    script.push_str("\n# logs\n");
    for log in &node.logs {
        if let Some(path) = logs.get(&log.name) {
            script.push_str(&format!(
                "{}={}\n",
                log.name,
                shell_quote(&path.display().to_string())
            ));
        }
    }

    script.push_str("\n# command\n");
    script.push_str(&cmd);
    script.push('\n');
    Ok(script)
}
