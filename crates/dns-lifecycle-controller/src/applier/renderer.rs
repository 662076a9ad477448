//! Template set rendering
//!
//! A template set is a list of YAML templates rendered against one values
//! tree. Sets come from the binary (`shoot-dns-service` is embedded) or from
//! `<dir>/<set>/*.yaml` on disk, rendered in file-name order.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use dns_lifecycle_common::kube_utils::{parse_manifests, Manifest};
use dns_lifecycle_common::template::TemplateEngine;
use dns_lifecycle_common::Error;

/// Renders a template set into manifests
///
/// Errors are [`Error::Render`]: permanent when the values don't fit the
/// templates, transient when templates couldn't be read.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TemplateRenderer: Send + Sync {
    /// Render every template of `template_set` against `values`
    async fn render(&self, template_set: &str, values: &Value) -> Result<Vec<Manifest>, Error>;
}

/// Where template sets are loaded from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TemplateSource {
    /// Sets compiled into the binary
    Embedded,
    /// `<dir>/<set>/*.yaml`
    Directory(PathBuf),
}

const EMBEDDED_SETS: &[(&str, &[(&str, &str)])] = &[(
    "shoot-dns-service",
    &[
        (
            "00-serviceaccount.yaml",
            include_str!("../../templates/shoot-dns-service/00-serviceaccount.yaml"),
        ),
        (
            "01-rbac.yaml",
            include_str!("../../templates/shoot-dns-service/01-rbac.yaml"),
        ),
        (
            "02-configmap.yaml",
            include_str!("../../templates/shoot-dns-service/02-configmap.yaml"),
        ),
        (
            "03-deployment.yaml",
            include_str!("../../templates/shoot-dns-service/03-deployment.yaml"),
        ),
        (
            "04-dnsentry.yaml",
            include_str!("../../templates/shoot-dns-service/04-dnsentry.yaml"),
        ),
    ],
)];

/// minijinja-backed renderer
pub struct MiniJinjaRenderer {
    engine: TemplateEngine,
    source: TemplateSource,
    default_namespace: String,
}

impl MiniJinjaRenderer {
    /// Create a renderer; namespaced manifests without a namespace land in
    /// `default_namespace`
    pub fn new(source: TemplateSource, default_namespace: impl Into<String>) -> Self {
        Self {
            engine: TemplateEngine::new(),
            source,
            default_namespace: default_namespace.into(),
        }
    }

    async fn load(&self, template_set: &str) -> Result<Vec<(String, String)>, Error> {
        match &self.source {
            TemplateSource::Embedded => EMBEDDED_SETS
                .iter()
                .find(|(name, _)| *name == template_set)
                .map(|(_, files)| {
                    files
                        .iter()
                        .map(|(name, src)| (name.to_string(), src.to_string()))
                        .collect()
                })
                .ok_or_else(|| {
                    Error::render_permanent(template_set, "no embedded template set by this name")
                }),
            TemplateSource::Directory(dir) => {
                let set_dir = dir.join(template_set);
                let mut entries = tokio::fs::read_dir(&set_dir).await.map_err(|e| {
                    Error::render_transient(
                        template_set,
                        format!("failed to read {}: {}", set_dir.display(), e),
                    )
                })?;

                let mut paths = Vec::new();
                while let Some(entry) = entries.next_entry().await.map_err(|e| {
                    Error::render_transient(template_set, format!("failed to list templates: {}", e))
                })? {
                    let path = entry.path();
                    let is_yaml = path
                        .extension()
                        .and_then(|ext| ext.to_str())
                        .is_some_and(|ext| ext == "yaml" || ext == "yml");
                    if is_yaml {
                        paths.push(path);
                    }
                }
                paths.sort();

                let mut files = Vec::with_capacity(paths.len());
                for path in paths {
                    let src = tokio::fs::read_to_string(&path).await.map_err(|e| {
                        Error::render_transient(
                            template_set,
                            format!("failed to read {}: {}", path.display(), e),
                        )
                    })?;
                    let name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    files.push((name, src));
                }
                Ok(files)
            }
        }
    }
}

#[async_trait]
impl TemplateRenderer for MiniJinjaRenderer {
    async fn render(&self, template_set: &str, values: &Value) -> Result<Vec<Manifest>, Error> {
        let files = self.load(template_set).await?;
        if files.is_empty() {
            return Err(Error::render_permanent(template_set, "template set is empty"));
        }

        let mut manifests = Vec::new();
        for (name, src) in &files {
            let rendered = self
                .engine
                .render(name, src, values)
                .map_err(|e| Error::render_permanent(template_set, e.to_string()))?;
            let parsed = parse_manifests(&rendered, &self.default_namespace).map_err(|e| {
                Error::render_permanent(template_set, format!("{} produced invalid YAML: {}", name, e))
            })?;
            manifests.extend(parsed);
        }

        debug!(
            template_set = %template_set,
            templates = files.len(),
            manifests = manifests.len(),
            "rendered template set"
        );
        Ok(manifests)
    }
}
