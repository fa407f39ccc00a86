//! Record fixtures and on-disk Collect directory trees.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use satchel_core::{FormDescriptor, TransferConfiguration, TransferRegistry};
use satchel_events::RecordId;
use tempfile::TempDir;

/// `count` descriptors with ids `form-0`, `form-1`, ...
#[must_use]
pub fn build_descriptor_list(count: usize) -> Vec<FormDescriptor> {
    (0..count)
        .map(|n| {
            FormDescriptor::new(
                format!("form-{n}"),
                format!("Form #{n}"),
                format!("forms/form-{n}.xml"),
            )
        })
        .collect()
}

/// Id of the `n`th fixture record.
#[must_use]
pub fn record_id(n: usize) -> RecordId {
    RecordId::new(format!("form-{n}"))
}

/// Registry over [`build_descriptor_list`] with an empty default configuration.
#[must_use]
pub fn build_registry(count: usize) -> TransferRegistry {
    TransferRegistry::from_descriptors(TransferConfiguration::default(), build_descriptor_list(count))
}

/// Configuration accepted by the default policy.
#[must_use]
pub fn valid_configuration(target_dir: impl Into<PathBuf>) -> TransferConfiguration {
    TransferConfiguration::with_target_dir(target_dir)
}

/// Temporary directory laid out like a Collect storage directory:
/// `forms/<name>.xml`, `forms/<name>-media/`, `instances/<instance>/<instance>.xml`.
#[derive(Debug)]
pub struct CollectDirFixture {
    root: TempDir,
}

impl CollectDirFixture {
    /// Empty tree with `forms/` and `instances/` created.
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary directory cannot be created.
    pub fn new() -> io::Result<Self> {
        let root = tempfile::tempdir()?;
        fs::create_dir_all(root.path().join("forms"))?;
        fs::create_dir_all(root.path().join("instances"))?;
        Ok(Self { root })
    }

    /// Root of the tree.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.root.path()
    }

    /// Write `forms/<file_stem>.xml` declaring `form_id` and `title`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn add_form(
        &self,
        file_stem: &str,
        form_id: &str,
        title: &str,
        encrypted: bool,
    ) -> io::Result<PathBuf> {
        let submission = if encrypted {
            r#"<submission base64RsaPublicKey="MIIBIjANBgkqhkiG9w0BAQEFAAOCAQ8AMIIBCgKCAQEA" method="form-data-post"/>"#
        } else {
            ""
        };
        let xml = format!(
            r#"<?xml version="1.0"?>
<h:html xmlns="http://www.w3.org/2002/xforms" xmlns:h="http://www.w3.org/1999/xhtml">
  <h:head>
    <h:title>{title}</h:title>
    <model>
      <instance>
        <data id="{form_id}" version="2024050101"><name/><meta><instanceID/></meta></data>
      </instance>
      {submission}
    </model>
  </h:head>
  <h:body/>
</h:html>
"#
        );
        let path = self.path().join("forms").join(format!("{file_stem}.xml"));
        fs::write(&path, xml)?;
        Ok(path)
    }

    /// Write a media attachment for the form stored as `file_stem`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn add_media(&self, file_stem: &str, name: &str, content: &[u8]) -> io::Result<PathBuf> {
        let dir = self.path().join("forms").join(format!("{file_stem}-media"));
        fs::create_dir_all(&dir)?;
        let path = dir.join(name);
        fs::write(&path, content)?;
        Ok(path)
    }

    /// Write a submission of `form_id` under `instances/<instance>/`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn add_instance(&self, instance: &str, form_id: &str) -> io::Result<PathBuf> {
        let dir = self.path().join("instances").join(instance);
        fs::create_dir_all(&dir)?;
        let xml = format!(
            r#"<?xml version='1.0' ?><data id="{form_id}" version="2024050101"><name>{instance}</name><meta><instanceID>uuid:{instance}</instanceID></meta></data>"#
        );
        let path = dir.join(format!("{instance}.xml"));
        fs::write(&path, xml)?;
        Ok(path)
    }
}
