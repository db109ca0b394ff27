//! Resource materializer.
//!
//! Resolves a node's typed inputs into local filesystem paths inside an
//! execution-scoped working directory, and lays out the paths for outputs
//! and logs. Any I/O failure here is fatal to the whole attempt; retry, if
//! any, belongs to the resource store's transport.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use weir_core::config::CloudConfig;
use weir_core::error::{Result, WeirError};
use weir_core::node::{FileType, Input, InputValue, Output};
use weir_core::traits::ResourceStore;

use crate::archive;

/// Execution-scoped working directory.
///
/// The uuid token makes the directory unique per attempt; it doubles as the
/// execution-unique prefix in synthesized cloud paths. Never reused across
/// attempts or shared across concurrent executions.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub token: String,
    pub workdir: PathBuf,
}

impl Workspace {
    pub fn new(base: &Path) -> Self {
        let token = Uuid::new_v4().to_string();
        let workdir = base.join(&token);
        Self { token, workdir }
    }

    pub async fn init(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.workdir).await?;
        debug!(workdir = %self.workdir.display(), "initialized working directory");
        Ok(())
    }

    /// Best-effort removal; failures are logged, never escalated.
    pub async fn clean_up(&self) {
        if let Err(e) = tokio::fs::remove_dir_all(&self.workdir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(workdir = %self.workdir.display(), error = %e, "failed to remove working directory");
            }
        }
    }

    pub fn input_path(&self, index: usize, name: &str) -> PathBuf {
        self.workdir.join(format!("i_{}_{}", index, name))
    }

    pub fn output_path(&self, name: &str) -> PathBuf {
        self.workdir.join(format!("o_{}", name))
    }

    pub fn log_path(&self, name: &str) -> PathBuf {
        self.workdir.join(format!("l_{}", name))
    }

    pub fn script_path(&self) -> PathBuf {
        self.workdir.join("exec.sh")
    }

    pub fn cloud_input_path(&self, prefix: &str, index: usize, name: &str) -> String {
        format!("{}/{}/i_{}_{}", prefix, self.token, index, name)
    }

    pub fn cloud_output_path(&self, prefix: &str, name: &str) -> String {
        format!("{}/{}/o_{}", prefix, self.token, name)
    }
}

/// Descriptor stored in place of the payload for CLOUD_STORAGE resources:
/// a small record pointing into external cloud storage.
#[derive(Debug, serde::Serialize, Deserialize)]
struct CloudDescriptor {
    path: String,
}

/// Local materialization of one input slot: one path per bound value, plus
/// resolved cloud paths for CLOUD_STORAGE-typed slots.
#[derive(Debug, Clone, Default)]
pub struct MaterializedSlot {
    pub paths: Vec<PathBuf>,
    pub cloud_paths: Vec<String>,
}

/// Structured form of a materialized slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotValue {
    Scalar(PathBuf),
    Sequence(Vec<PathBuf>),
}

impl MaterializedSlot {
    /// Structured value: a scalar path for single-cardinality inputs, an
    /// ordered sequence otherwise.
    pub fn structured(&self, input: &Input) -> SlotValue {
        match (input.is_single(), self.paths.as_slice()) {
            (true, [path]) => SlotValue::Scalar(path.clone()),
            _ => SlotValue::Sequence(self.paths.clone()),
        }
    }

    /// Single-space join of the local paths.
    ///
    /// Ambiguous when a path contains embedded whitespace; kept as the
    /// flattened-mode contract.
    pub fn flatten_paths(&self) -> String {
        self.paths
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn flatten_cloud(&self) -> String {
        self.cloud_paths.join(" ")
    }
}

/// Resolves inputs/outputs/logs into a working directory layout.
pub struct Materializer {
    store: Arc<dyn ResourceStore>,
    cloud: CloudConfig,
}

impl Materializer {
    pub fn new(store: Arc<dyn ResourceStore>, cloud: CloudConfig) -> Self {
        Self { store, cloud }
    }

    /// Materialize every input slot.
    ///
    /// In preview mode no download occurs: each required slot gets a
    /// synthetic path derived from the same naming scheme.
    pub async fn prepare_inputs(
        &self,
        inputs: &[Input],
        ws: &Workspace,
        preview: bool,
    ) -> Result<HashMap<String, MaterializedSlot>> {
        let mut slots = HashMap::with_capacity(inputs.len());

        for input in inputs {
            let mut slot = MaterializedSlot::default();

            if preview {
                for index in 0..input.min_count {
                    if input.accepts(FileType::CloudStorage) {
                        slot.cloud_paths.push(ws.cloud_input_path(
                            &self.cloud.prefix,
                            index,
                            &input.name,
                        ));
                    }
                    slot.paths.push(ws.input_path(index, &input.name));
                }
            } else {
                for (index, value) in input.values.iter().enumerate() {
                    let (path, cloud_path) =
                        self.fetch_input_value(input, index, value, ws).await?;
                    slot.paths.push(path);
                    if let Some(cloud_path) = cloud_path {
                        slot.cloud_paths.push(cloud_path);
                    }
                }
            }

            slots.insert(input.name.clone(), slot);
        }

        Ok(slots)
    }

    /// Download one bound value and apply per-type post-processing.
    async fn fetch_input_value(
        &self,
        input: &Input,
        index: usize,
        value: &InputValue,
        ws: &Workspace,
    ) -> Result<(PathBuf, Option<String>)> {
        let path = ws.input_path(index, &input.name);

        let mut stream = self.store.download_stream(&value.resource_id).await?;
        let mut file = tokio::fs::File::create(&path).await?;
        tokio::io::copy(&mut stream, &mut file).await?;
        file.flush().await?;
        drop(file);
        debug!(input = %input.name, index, path = %path.display(), "materialized input value");

        if input.accepts(FileType::Executable) {
            set_executable(&path).await?;
        }

        if input.accepts(FileType::Directory) {
            // The downloaded bytes are a zip archive: move it aside and
            // extract into a directory at the canonical path.
            let zip_path = archive::zip_sibling(&path);
            tokio::fs::rename(&path, &zip_path).await?;
            tokio::fs::create_dir(&path).await?;
            archive::unzip_into(zip_path, path.clone()).await?;
        }

        let mut cloud_path = None;
        if input.accepts(FileType::CloudStorage) {
            // The downloaded bytes are a descriptor, not the payload.
            let bytes = tokio::fs::read(&path).await?;
            let descriptor: CloudDescriptor = serde_json::from_slice(&bytes).map_err(|e| {
                WeirError::Materialize(format!(
                    "input `{}` value {} is not a cloud descriptor: {}",
                    input.name, index, e
                ))
            })?;
            cloud_path = Some(descriptor.path);
        }

        Ok((path, cloud_path))
    }

    /// Lay out output paths; directory outputs get a pre-created empty
    /// directory, cloud outputs get a descriptor file and a synthesized
    /// cloud path.
    pub async fn prepare_outputs(
        &self,
        outputs: &[Output],
        ws: &Workspace,
        preview: bool,
    ) -> Result<(HashMap<String, PathBuf>, HashMap<String, String>)> {
        let mut paths = HashMap::with_capacity(outputs.len());
        let mut cloud_paths = HashMap::new();

        for output in outputs {
            let path = ws.output_path(&output.name);

            if preview {
                if output.file_type == FileType::CloudStorage {
                    cloud_paths.insert(
                        output.name.clone(),
                        ws.cloud_output_path(&self.cloud.prefix, &output.name),
                    );
                }
            } else {
                match output.file_type {
                    FileType::Directory => {
                        tokio::fs::create_dir(&path).await?;
                    }
                    FileType::CloudStorage => {
                        let cloud_path = ws.cloud_output_path(&self.cloud.prefix, &output.name);
                        let descriptor = CloudDescriptor {
                            path: cloud_path.clone(),
                        };
                        tokio::fs::write(&path, serde_json::to_vec(&descriptor)?).await?;
                        cloud_paths.insert(output.name.clone(), cloud_path);
                    }
                    FileType::File | FileType::Executable => {}
                }
            }

            paths.insert(output.name.clone(), path);
        }

        Ok((paths, cloud_paths))
    }

    /// Lay out log paths. Log files are created by the supervisor.
    pub fn prepare_logs(&self, logs: &[Output], ws: &Workspace) -> HashMap<String, PathBuf> {
        logs.iter()
            .map(|log| (log.name.clone(), ws.log_path(&log.name)))
            .collect()
    }
}

/// Add the owner executable bit, keeping existing permission bits.
#[cfg(unix)]
async fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = tokio::fs::metadata(path).await?;
    let mut permissions = metadata.permissions();
    permissions.set_mode(permissions.mode() | 0o100);
    tokio::fs::set_permissions(path, permissions).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_executable(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use weir_core::node::ResourceId;
    use weir_store::MemoryStore;

    fn materializer(store: Arc<MemoryStore>) -> Materializer {
        Materializer::new(store, CloudConfig::default())
    }

    fn input(name: &str, file_types: Vec<FileType>, ids: Vec<ResourceId>) -> Input {
        let n = ids.len();
        Input {
            name: name.into(),
            file_types,
            min_count: n.max(1),
            max_count: n.max(1),
            values: ids
                .into_iter()
                .map(|resource_id| InputValue { resource_id })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_plain_file_input_materializes_bytes() {
        let store = Arc::new(MemoryStore::new());
        let id = store.insert(b"payload".to_vec());
        let scratch = tempfile::tempdir().unwrap();
        let ws = Workspace::new(scratch.path());
        ws.init().await.unwrap();

        let slots = materializer(Arc::clone(&store))
            .prepare_inputs(&[input("data", vec![FileType::File], vec![id])], &ws, false)
            .await
            .unwrap();

        let slot = &slots["data"];
        assert_eq!(slot.paths.len(), 1);
        assert!(slot.paths[0].ends_with("i_0_data"));
        assert_eq!(std::fs::read(&slot.paths[0]).unwrap(), b"payload");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_executable_input_gains_exec_bit() {
        use std::os::unix::fs::PermissionsExt;

        let store = Arc::new(MemoryStore::new());
        let id = store.insert(b"#!/bin/sh\necho hi\n".to_vec());
        let scratch = tempfile::tempdir().unwrap();
        let ws = Workspace::new(scratch.path());
        ws.init().await.unwrap();

        let slots = materializer(Arc::clone(&store))
            .prepare_inputs(
                &[input("tool", vec![FileType::Executable], vec![id])],
                &ws,
                false,
            )
            .await
            .unwrap();

        let mode = std::fs::metadata(&slots["tool"].paths[0])
            .unwrap()
            .permissions()
            .mode();
        assert_ne!(mode & 0o100, 0);
    }

    #[tokio::test]
    async fn test_directory_input_extracts_archive() {
        let scratch = tempfile::tempdir().unwrap();

        // Build a three-file archive through the same packer the engine uses.
        let src = scratch.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        for name in ["one.txt", "two.txt", "three.txt"] {
            std::fs::write(src.join(name), name.as_bytes()).unwrap();
        }
        let archive_path = scratch.path().join("dir.zip");
        archive::zip_dir(src, archive_path.clone()).await.unwrap();

        let store = Arc::new(MemoryStore::new());
        let id = store.insert(std::fs::read(&archive_path).unwrap());

        let ws = Workspace::new(scratch.path());
        ws.init().await.unwrap();
        let slots = materializer(Arc::clone(&store))
            .prepare_inputs(
                &[input("bundle", vec![FileType::Directory], vec![id])],
                &ws,
                false,
            )
            .await
            .unwrap();

        let dir = &slots["bundle"].paths[0];
        assert!(dir.is_dir());
        let mut names: Vec<_> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        assert_eq!(names, vec!["one.txt", "three.txt", "two.txt"]);
    }

    #[tokio::test]
    async fn test_cloud_input_dereferences_descriptor() {
        let store = Arc::new(MemoryStore::new());
        let id = store.insert(br#"{"path": "gs://bucket/datasets/run-7"}"#.to_vec());
        let scratch = tempfile::tempdir().unwrap();
        let ws = Workspace::new(scratch.path());
        ws.init().await.unwrap();

        let slots = materializer(Arc::clone(&store))
            .prepare_inputs(
                &[input("blob", vec![FileType::CloudStorage], vec![id])],
                &ws,
                false,
            )
            .await
            .unwrap();

        let slot = &slots["blob"];
        assert_eq!(slot.cloud_paths, vec!["gs://bucket/datasets/run-7"]);
        // The local descriptor path is exposed alongside the cloud path.
        assert_eq!(slot.paths.len(), 1);
    }

    #[tokio::test]
    async fn test_preview_synthesizes_without_store_access() {
        let store = Arc::new(MemoryStore::new());
        let scratch = tempfile::tempdir().unwrap();
        let ws = Workspace::new(scratch.path());

        let mut preview_input = input("data", vec![FileType::CloudStorage], vec![]);
        preview_input.min_count = 2;
        preview_input.max_count = 2;

        let slots = materializer(Arc::clone(&store))
            .prepare_inputs(&[preview_input], &ws, true)
            .await
            .unwrap();

        let slot = &slots["data"];
        assert_eq!(slot.paths.len(), 2);
        assert_eq!(slot.cloud_paths.len(), 2);
        assert!(slot.cloud_paths[0].starts_with("gs://weir/"));
        assert!(slot.cloud_paths[1].ends_with("i_1_data"));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_directory_output_precreated() {
        let store = Arc::new(MemoryStore::new());
        let scratch = tempfile::tempdir().unwrap();
        let ws = Workspace::new(scratch.path());
        ws.init().await.unwrap();

        let outputs = vec![
            Output::new("report", FileType::File),
            Output::new("bundle", FileType::Directory),
        ];
        let (paths, cloud) = materializer(store)
            .prepare_outputs(&outputs, &ws, false)
            .await
            .unwrap();

        assert!(!paths["report"].exists());
        assert!(paths["bundle"].is_dir());
        assert!(cloud.is_empty());
    }

    #[tokio::test]
    async fn test_cloud_output_descriptor_written() {
        let store = Arc::new(MemoryStore::new());
        let scratch = tempfile::tempdir().unwrap();
        let ws = Workspace::new(scratch.path());
        ws.init().await.unwrap();

        let outputs = vec![Output::new("export", FileType::CloudStorage)];
        let (paths, cloud) = materializer(store)
            .prepare_outputs(&outputs, &ws, false)
            .await
            .unwrap();

        let bytes = std::fs::read(&paths["export"]).unwrap();
        let descriptor: super::CloudDescriptor = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(descriptor.path, cloud["export"]);
        assert!(descriptor.path.contains(&ws.token));
    }

    #[test]
    fn test_structured_scalar_vs_sequence() {
        let single = input("one", vec![FileType::File], vec![]);
        let mut multi = input("many", vec![FileType::File], vec![]);
        multi.min_count = 2;
        multi.max_count = 3;

        let slot = MaterializedSlot {
            paths: vec![PathBuf::from("/w/i_0_one")],
            cloud_paths: vec![],
        };
        assert_eq!(
            slot.structured(&single),
            SlotValue::Scalar(PathBuf::from("/w/i_0_one"))
        );
        assert_eq!(
            slot.structured(&multi),
            SlotValue::Sequence(vec![PathBuf::from("/w/i_0_one")])
        );
    }

    #[test]
    fn test_flatten_joins_with_single_space() {
        let slot = MaterializedSlot {
            paths: vec![PathBuf::from("/w/i_0_x"), PathBuf::from("/w/i_1_x")],
            cloud_paths: vec![],
        };
        assert_eq!(slot.flatten_paths(), "/w/i_0_x /w/i_1_x");
    }
}
