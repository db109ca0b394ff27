//! Output collector.
//!
//! Uploads produced artifacts back into the resource store and binds the
//! returned identifiers onto the node's declared outputs and logs. Runs
//! after every attempt, successful or not; partial artifacts from a
//! failed run are still wanted for diagnosis.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use weir_core::error::{Result, WeirError};
use weir_core::node::{FileType, Node};
use weir_core::traits::ResourceStore;

use crate::archive;

pub struct Collector {
    store: Arc<dyn ResourceStore>,
}

impl Collector {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }

    /// Upload every produced output that exists on disk.
    ///
    /// Directory outputs are re-archived first; the archive is what gets a
    /// resource identifier. A produced name with no (or more than one)
    /// declared output is a configuration defect and fails loudly.
    pub async fn collect_outputs(
        &self,
        node: &mut Node,
        output_paths: &HashMap<String, PathBuf>,
    ) -> Result<()> {
        for (name, path) in output_paths {
            if !path.exists() {
                continue;
            }

            let matching = node.outputs.iter().filter(|o| o.name == *name).count();
            if matching == 0 {
                return Err(WeirError::UndeclaredArtifact {
                    name: name.clone(),
                    kind: "output".to_string(),
                });
            }
            if matching > 1 {
                return Err(WeirError::Collect(format!(
                    "found {} declared outputs named `{}`",
                    matching, name
                )));
            }

            let file_type = node
                .outputs
                .iter()
                .find(|o| o.name == *name)
                .map(|o| o.file_type)
                .ok_or_else(|| WeirError::Collect(format!("output `{}` vanished", name)))?;

            let upload_path = if file_type == FileType::Directory {
                let zip_path = archive::zip_sibling(path);
                archive::zip_dir(path.clone(), zip_path.clone()).await?;
                zip_path
            } else {
                path.clone()
            };

            let file = tokio::fs::File::open(&upload_path).await?;
            let id = self.store.upload_stream(Box::new(file)).await?;
            debug!(output = %name, resource_id = %id, "collected output");

            if let Some(output) = node.get_output_by_name_mut(name) {
                output.resource_id = Some(id);
            }
        }
        Ok(())
    }

    /// Upload logs that exist and are non-empty.
    ///
    /// A zero-byte log produces no resource identifier; storage is never
    /// allocated for logs that were never written.
    pub async fn collect_logs(
        &self,
        node: &mut Node,
        log_paths: &HashMap<String, PathBuf>,
    ) -> Result<()> {
        for (name, path) in log_paths {
            let metadata = match tokio::fs::metadata(path).await {
                Ok(metadata) => metadata,
                Err(_) => continue,
            };
            if metadata.len() == 0 {
                continue;
            }

            if node.logs.iter().all(|l| l.name != *name) {
                return Err(WeirError::UndeclaredArtifact {
                    name: name.clone(),
                    kind: "log".to_string(),
                });
            }

            let file = tokio::fs::File::open(path).await?;
            let id = self.store.upload_stream(Box::new(file)).await?;
            debug!(log = %name, resource_id = %id, bytes = metadata.len(), "collected log");

            if let Some(log) = node.get_log_by_name_mut(name) {
                log.resource_id = Some(id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weir_core::node::Output;
    use weir_store::MemoryStore;

    fn node_with(outputs: Vec<Output>, logs: Vec<Output>) -> Node {
        let mut node = Node::default_command_node();
        node.title = "collect".into();
        node.outputs = outputs;
        node.logs = logs;
        node
    }

    #[tokio::test]
    async fn test_missing_artifact_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        let scratch = tempfile::tempdir().unwrap();
        let mut node = node_with(vec![Output::new("out", FileType::File)], vec![]);

        let paths = HashMap::from([("out".to_string(), scratch.path().join("o_out"))]);
        Collector::new(store.clone())
            .collect_outputs(&mut node, &paths)
            .await
            .unwrap();

        assert!(node.outputs[0].resource_id.is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_existing_output_uploaded_and_bound() {
        let store = Arc::new(MemoryStore::new());
        let scratch = tempfile::tempdir().unwrap();
        let path = scratch.path().join("o_out");
        std::fs::write(&path, b"result bytes").unwrap();

        let mut node = node_with(vec![Output::new("out", FileType::File)], vec![]);
        let paths = HashMap::from([("out".to_string(), path)]);
        Collector::new(store.clone())
            .collect_outputs(&mut node, &paths)
            .await
            .unwrap();

        let id = node.outputs[0].resource_id.clone().expect("bound id");
        assert_eq!(store.get(&id).unwrap(), b"result bytes");
    }

    #[tokio::test]
    async fn test_undeclared_output_fails_loudly() {
        let store = Arc::new(MemoryStore::new());
        let scratch = tempfile::tempdir().unwrap();
        let path = scratch.path().join("o_ghost");
        std::fs::write(&path, b"x").unwrap();

        let mut node = node_with(vec![], vec![]);
        let paths = HashMap::from([("ghost".to_string(), path)]);
        let err = Collector::new(store)
            .collect_outputs(&mut node, &paths)
            .await
            .unwrap_err();
        assert!(matches!(err, WeirError::UndeclaredArtifact { .. }));
    }

    #[tokio::test]
    async fn test_directory_output_uploaded_as_zip() {
        let store = Arc::new(MemoryStore::new());
        let scratch = tempfile::tempdir().unwrap();
        let dir = scratch.path().join("o_bundle");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join("part.txt"), b"part").unwrap();

        let mut node = node_with(vec![Output::new("bundle", FileType::Directory)], vec![]);
        let paths = HashMap::from([("bundle".to_string(), dir)]);
        Collector::new(store.clone())
            .collect_outputs(&mut node, &paths)
            .await
            .unwrap();

        let id = node.outputs[0].resource_id.clone().expect("bound id");
        let bytes = store.get(&id).unwrap();
        // zip local-file header magic
        assert_eq!(&bytes[..2], b"PK");
    }

    #[tokio::test]
    async fn test_empty_log_produces_no_resource() {
        let store = Arc::new(MemoryStore::new());
        let scratch = tempfile::tempdir().unwrap();
        let empty = scratch.path().join("l_stderr");
        let full = scratch.path().join("l_stdout");
        std::fs::write(&empty, b"").unwrap();
        std::fs::write(&full, b"line\n").unwrap();

        let mut node = node_with(
            vec![],
            vec![
                Output::new("stderr", FileType::File),
                Output::new("stdout", FileType::File),
            ],
        );
        let paths = HashMap::from([
            ("stderr".to_string(), empty),
            ("stdout".to_string(), full),
        ]);
        Collector::new(store.clone())
            .collect_logs(&mut node, &paths)
            .await
            .unwrap();

        assert!(node.get_log_by_name_mut("stderr").unwrap().resource_id.is_none());
        assert!(node.get_log_by_name_mut("stdout").unwrap().resource_id.is_some());
        assert_eq!(store.len(), 1);
    }
}
