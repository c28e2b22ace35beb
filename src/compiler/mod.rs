use anyhow::Result;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tera::{Context, Tera};

use crate::error::PipelineError;
use crate::netbox::{Inventory, InventoryDevice};

const DEFAULT_EXTENSION: &str = "conf";

/// Device tag slug -> template file name, iterated in tag order
pub type TemplateMapping = BTreeMap<String, String>;

#[derive(Debug, Default)]
pub struct CompileSummary {
    pub tags: usize,
    pub written: Vec<PathBuf>,
}

/// Read the flat JSON tag -> template mapping
pub fn load_mapping(path: &Path) -> Result<TemplateMapping, PipelineError> {
    let invalid = |reason: String| PipelineError::InvalidMapping {
        path: path.to_path_buf(),
        reason,
    };

    let content = std::fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
    serde_json::from_str(&content).map_err(|e| invalid(e.to_string()))
}

/// Load every file under `dir` as a template, named by its path relative to
/// `dir`, so `{% include "common/base.conf" %}` resolves inside the directory.
pub fn load_templates(dir: &Path) -> Result<Tera, PipelineError> {
    if !dir.is_dir() {
        return Err(PipelineError::TemplatesDirMissing(dir.to_path_buf()));
    }

    let glob = format!("{}/**/*", dir.display());
    let mut tera = Tera::new(&glob).map_err(|e| PipelineError::TemplateParse(error_chain(&e)))?;
    // device configs are not HTML
    tera.autoescape_on(vec![]);
    Ok(tera)
}

/// Flatten a tera error and its sources; the useful part
/// ("Variable `x` not found") is usually a source, not the top error.
fn error_chain(err: &tera::Error) -> String {
    let mut msg = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(e) = source {
        msg.push_str(": ");
        msg.push_str(&e.to_string());
        source = std::error::Error::source(e);
    }
    msg
}

/// Extension of the rendered file: the template's last extension
/// (`router.tpl.conf` -> `conf`)
fn output_extension(template: &str) -> &str {
    Path::new(template)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .unwrap_or(DEFAULT_EXTENSION)
}

/// Device name as used in a file name: `/` becomes `_` (`core/sw1` -> `core_sw1`).
/// The applier maps stems back to devices through this too.
pub fn file_safe_name(device: &str) -> String {
    device.replace('/', "_")
}

fn output_file_name(device: &str, template: &str) -> String {
    format!("{}.{}", file_safe_name(device), output_extension(template))
}

/// Render one template with the device's config context as variables
pub fn render_device(tera: &Tera, template: &str, device: &InventoryDevice) -> Result<String, PipelineError> {
    let render_err = |reason: String| PipelineError::Render {
        device: device.name.clone(),
        template: template.to_string(),
        reason,
    };

    let context = match &device.config_context {
        serde_json::Value::Object(_) => {
            Context::from_value(device.config_context.clone()).map_err(|e| render_err(error_chain(&e)))?
        }
        serde_json::Value::Null => Context::new(),
        other => {
            tracing::warn!(
                "{}: config context is a {} rather than an object, rendering without variables",
                device.name,
                json_kind(other)
            );
            Context::new()
        }
    };

    tera.render(template, &context)
        .map_err(|e| render_err(error_chain(&e)))
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "list",
        serde_json::Value::Object(_) => "object",
    }
}

/// Render a config file for every device of every mapped tag into `output_dir`.
///
/// Mapping and template problems are found before the inventory is queried.
/// Any render failure aborts the run.
pub async fn compile(
    inventory: &dyn Inventory,
    mapping_path: &Path,
    templates_dir: &Path,
    output_dir: &Path,
    only_tag: Option<&str>,
) -> Result<CompileSummary> {
    let mut mapping = load_mapping(mapping_path)?;
    if let Some(tag) = only_tag {
        mapping.retain(|t, _| t == tag);
        if mapping.is_empty() {
            return Err(anyhow::anyhow!("Tag '{}' is not in {}", tag, mapping_path.display()));
        }
    }
    if mapping.is_empty() {
        tracing::warn!("Template mapping {} is empty, nothing to compile", mapping_path.display());
    }

    let tera = load_templates(templates_dir)?;
    for template in mapping.values() {
        if tera.get_template(template).is_err() {
            return Err(PipelineError::TemplateNotFound(template.clone()).into());
        }
    }

    tokio::fs::create_dir_all(output_dir).await?;

    let mut summary = CompileSummary::default();
    // file stem -> (device, tag, file) that produced it; one config per stem
    let mut produced_by: HashMap<String, (String, String, PathBuf)> = HashMap::new();

    for (tag, template) in &mapping {
        let devices = inventory.devices_with_tag(tag).await?;
        tracing::info!("Tag '{}': {} device(s), template {}", tag, devices.len(), template);
        summary.tags += 1;

        for device in &devices {
            let rendered = render_device(&tera, template, device)?;
            let path = output_dir.join(output_file_name(&device.name, template));
            let produced = (device.name.clone(), tag.clone(), path.clone());

            match produced_by.insert(file_safe_name(&device.name), produced) {
                Some((previous_device, previous_tag, previous_path)) => {
                    tracing::warn!(
                        "{}: tag '{}' replaces the config rendered for {} by tag '{}' ({})",
                        device.name,
                        tag,
                        previous_device,
                        previous_tag,
                        previous_path.display()
                    );
                    if previous_path != path {
                        tokio::fs::remove_file(&previous_path).await?;
                    }
                    if let Some(slot) = summary.written.iter_mut().find(|p| **p == previous_path) {
                        *slot = path.clone();
                    }
                }
                None => summary.written.push(path.clone()),
            }

            tokio::fs::write(&path, rendered).await?;
            tracing::info!("{}: wrote {}", device.name, path.display());
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeInventory {
        devices: HashMap<String, Vec<InventoryDevice>>,
        queried: Mutex<Vec<String>>,
    }

    impl FakeInventory {
        fn with(mut self, tag: &str, name: &str, context: serde_json::Value) -> Self {
            self.devices.entry(tag.to_string()).or_default().push(InventoryDevice {
                name: name.to_string(),
                config_context: context,
            });
            self
        }
    }

    #[async_trait]
    impl Inventory for FakeInventory {
        async fn devices_with_tag(&self, tag: &str) -> Result<Vec<InventoryDevice>> {
            self.queried.lock().unwrap().push(tag.to_string());
            Ok(self.devices.get(tag).cloned().unwrap_or_default())
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new(mapping: &str) -> Self {
            let dir = tempfile::tempdir().unwrap();
            std::fs::create_dir_all(dir.path().join("templates/common")).unwrap();
            std::fs::write(dir.path().join("mapping.json"), mapping).unwrap();
            Self { dir }
        }

        fn template(self, name: &str, body: &str) -> Self {
            std::fs::write(self.dir.path().join("templates").join(name), body).unwrap();
            self
        }

        fn mapping(&self) -> PathBuf {
            self.dir.path().join("mapping.json")
        }

        fn templates(&self) -> PathBuf {
            self.dir.path().join("templates")
        }

        fn out(&self) -> PathBuf {
            self.dir.path().join("out/configs")
        }

        async fn compile(&self, inventory: &FakeInventory) -> Result<CompileSummary> {
            compile(inventory, &self.mapping(), &self.templates(), &self.out(), None).await
        }
    }

    fn pipeline_error(err: &anyhow::Error) -> &PipelineError {
        err.downcast_ref::<PipelineError>().expect("expected a PipelineError")
    }

    #[tokio::test]
    async fn test_renders_banner_for_router() {
        let fx = Fixture::new(r#"{"router": "router.tpl.conf"}"#)
            .template("router.tpl.conf", "hostname R1\nbanner motd ^{{ motd }}^\n");
        let inv = FakeInventory::default().with("router", "R1", serde_json::json!({"motd": "Hello"}));

        let summary = fx.compile(&inv).await.unwrap();

        assert_eq!(summary.tags, 1);
        assert_eq!(summary.written, vec![fx.out().join("R1.conf")]);
        let text = std::fs::read_to_string(fx.out().join("R1.conf")).unwrap();
        assert!(text.contains("banner motd ^Hello^"));
    }

    #[tokio::test]
    async fn test_recompile_is_byte_identical() {
        let fx = Fixture::new(r#"{"router": "router.tpl.conf", "switch": "switch.tpl.conf"}"#)
            .template("router.tpl.conf", "hostname {{ hostname }}\n{% for v in vlans %}vlan {{ v }}\n{% endfor %}")
            .template("switch.tpl.conf", "hostname {{ hostname }}\nspanning-tree mode {{ stp.mode }}\n");
        let inv = FakeInventory::default()
            .with("router", "R1", serde_json::json!({"hostname": "R1", "vlans": [10, 20]}))
            .with("switch", "SW1", serde_json::json!({"hostname": "SW1", "stp": {"mode": "rapid-pvst"}}));

        fx.compile(&inv).await.unwrap();
        let first_r1 = std::fs::read(fx.out().join("R1.conf")).unwrap();
        let first_sw1 = std::fs::read(fx.out().join("SW1.conf")).unwrap();

        fx.compile(&inv).await.unwrap();
        assert_eq!(std::fs::read(fx.out().join("R1.conf")).unwrap(), first_r1);
        assert_eq!(std::fs::read(fx.out().join("SW1.conf")).unwrap(), first_sw1);
        assert_eq!(String::from_utf8(first_r1).unwrap(), "hostname R1\nvlan 10\nvlan 20\n");
        assert!(String::from_utf8(first_sw1).unwrap().contains("spanning-tree mode rapid-pvst"));
    }

    #[tokio::test]
    async fn test_include_is_relative_to_templates_dir() {
        let fx = Fixture::new(r#"{"router": "router.tpl.conf"}"#)
            .template("common/base.conf", "service timestamps log datetime msec\n")
            .template("router.tpl.conf", "{% include \"common/base.conf\" %}hostname {{ name }}\n");
        let inv = FakeInventory::default().with("router", "R2", serde_json::json!({"name": "R2"}));

        fx.compile(&inv).await.unwrap();
        let text = std::fs::read_to_string(fx.out().join("R2.conf")).unwrap();
        assert_eq!(text, "service timestamps log datetime msec\nhostname R2\n");
    }

    #[tokio::test]
    async fn test_malformed_mapping_is_fatal() {
        let fx = Fixture::new(r#"{"router": "router.tpl.conf""#).template("router.tpl.conf", "x");
        let inv = FakeInventory::default();

        let err = fx.compile(&inv).await.unwrap_err();
        assert!(matches!(pipeline_error(&err), PipelineError::InvalidMapping { .. }));
        assert!(!fx.out().exists());
    }

    #[tokio::test]
    async fn test_mapping_values_must_be_strings() {
        let fx = Fixture::new(r#"{"router": 7}"#);
        let err = fx.compile(&FakeInventory::default()).await.unwrap_err();
        assert!(matches!(pipeline_error(&err), PipelineError::InvalidMapping { .. }));
    }

    #[tokio::test]
    async fn test_missing_template_is_fatal_before_inventory_lookup() {
        let fx = Fixture::new(r#"{"router": "router.tpl.conf"}"#);
        let inv = FakeInventory::default().with("router", "R1", serde_json::json!({}));

        let err = fx.compile(&inv).await.unwrap_err();
        assert!(matches!(pipeline_error(&err), PipelineError::TemplateNotFound(t) if t == "router.tpl.conf"));
        assert!(inv.queried.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_templates_dir_is_fatal() {
        let fx = Fixture::new(r#"{"router": "router.tpl.conf"}"#);
        let err = compile(&FakeInventory::default(), &fx.mapping(), &fx.dir.path().join("nope"), &fx.out(), None)
            .await
            .unwrap_err();
        assert!(matches!(pipeline_error(&err), PipelineError::TemplatesDirMissing(_)));
    }

    #[tokio::test]
    async fn test_unresolved_variable_is_a_render_error() {
        let fx = Fixture::new(r#"{"router": "router.tpl.conf"}"#)
            .template("router.tpl.conf", "banner motd ^{{ motd }}^\n");
        let inv = FakeInventory::default().with("router", "R1", serde_json::json!({"hostname": "R1"}));

        let err = fx.compile(&inv).await.unwrap_err();
        match pipeline_error(&err) {
            PipelineError::Render { device, reason, .. } => {
                assert_eq!(device, "R1");
                assert!(reason.contains("motd"), "{}", reason);
            }
            other => panic!("unexpected error: {}", other),
        }
        assert!(!fx.out().join("R1.conf").exists());
    }

    #[tokio::test]
    async fn test_only_tag_limits_the_run() {
        let fx = Fixture::new(r#"{"router": "router.tpl.conf", "switch": "switch.tpl.conf"}"#)
            .template("router.tpl.conf", "router\n")
            .template("switch.tpl.conf", "switch\n");
        let inv = FakeInventory::default()
            .with("router", "R1", serde_json::Value::Null)
            .with("switch", "SW1", serde_json::Value::Null);

        let summary = compile(&inv, &fx.mapping(), &fx.templates(), &fx.out(), Some("switch"))
            .await
            .unwrap();
        assert_eq!(summary.written, vec![fx.out().join("SW1.conf")]);
        assert_eq!(*inv.queried.lock().unwrap(), vec!["switch".to_string()]);

        let err = compile(&inv, &fx.mapping(), &fx.templates(), &fx.out(), Some("firewall"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("firewall"));
    }

    #[tokio::test]
    async fn test_device_with_two_tags_is_written_once() {
        let fx = Fixture::new(r#"{"edge": "edge.tpl.conf", "router": "router.tpl.conf"}"#)
            .template("edge.tpl.conf", "edge\n")
            .template("router.tpl.conf", "router\n");
        let inv = FakeInventory::default()
            .with("edge", "R1", serde_json::Value::Null)
            .with("router", "R1", serde_json::Value::Null);

        let summary = fx.compile(&inv).await.unwrap();
        assert_eq!(summary.written.len(), 1);
        // tags run in sorted order, so "router" wins
        assert_eq!(std::fs::read_to_string(fx.out().join("R1.conf")).unwrap(), "router\n");
    }

    #[tokio::test]
    async fn test_second_tag_with_other_extension_replaces_file() {
        let fx = Fixture::new(r#"{"edge": "edge.j2", "router": "router.tpl.conf"}"#)
            .template("edge.j2", "edge\n")
            .template("router.tpl.conf", "router\n");
        let inv = FakeInventory::default()
            .with("edge", "R1", serde_json::Value::Null)
            .with("router", "R1", serde_json::Value::Null);

        let summary = fx.compile(&inv).await.unwrap();
        assert_eq!(summary.written, vec![fx.out().join("R1.conf")]);
        assert!(!fx.out().join("R1.j2").exists());
        assert_eq!(std::fs::read_to_string(fx.out().join("R1.conf")).unwrap(), "router\n");
    }

    #[test]
    fn test_output_file_name() {
        assert_eq!(output_file_name("R1", "router.tpl.conf"), "R1.conf");
        assert_eq!(output_file_name("core/sw1", "switch.j2"), "core_sw1.j2");
        assert_eq!(output_file_name("R1", "router"), "R1.conf");
    }
}
