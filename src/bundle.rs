use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use crate::errors::BundlerError;
use crate::policy::render;
use crate::policy::Service;

/// Top-level package owned by the bundle entry module.
pub const ENTRY_ROOT: &str = "envoy";
/// Module path of the bundle entry module.
pub const MAIN_MODULE: &str = "/main.rego";
/// Per-service predicate the entry module delegates to.
pub const ENTRY_PREDICATE: &str = "allow_request";

/// Bundle manifest: owned package roots plus metadata, of which the ordered
/// service list is the canonical part.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifest {
    pub roots: Vec<String>,
    pub services: Vec<String>,
    /// Metadata keys other than `services`, preserved across load/save.
    pub extra_metadata: Map<String, Value>,
}

impl Manifest {
    pub fn to_json(&self) -> Value {
        let mut metadata = self.extra_metadata.clone();
        metadata.insert("services".to_string(), json!(self.services));
        json!({ "roots": self.roots, "metadata": metadata })
    }

    /// Parse and normalize a manifest payload. The service list must be an
    /// array of strings; anything else in its place is a corrupt manifest.
    pub fn from_json(value: &Value) -> Result<Self, BundlerError> {
        let obj = value
            .as_object()
            .ok_or_else(|| corrupt("manifest is not an object"))?;

        let roots = match obj.get("roots") {
            None => Vec::new(),
            Some(v) => string_array(v).ok_or_else(|| corrupt("`roots` is not a string array"))?,
        };

        let mut extra_metadata = match obj.get("metadata") {
            None => Map::new(),
            Some(Value::Object(m)) => m.clone(),
            Some(_) => return Err(corrupt("`metadata` is not an object")),
        };

        let services = match extra_metadata.remove("services") {
            None => Vec::new(),
            Some(v) => string_array(&v)
                .ok_or_else(|| corrupt("`metadata.services` is not a string array"))?,
        };

        Ok(Self {
            roots,
            services,
            extra_metadata,
        })
    }
}

fn corrupt(msg: &str) -> BundlerError {
    BundlerError::CorruptManifest(msg.to_string())
}

fn string_array(value: &Value) -> Option<Vec<String>> {
    let items = value.as_array()?;
    items
        .iter()
        .map(|v| v.as_str().map(str::to_string))
        .collect()
}

/// A multi-service policy bundle: raw Rego modules addressed by path, plus
/// the manifest. Mutations are pure; callers publish the returned value,
/// which makes rollback on failure a matter of not publishing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bundle {
    modules: BTreeMap<String, String>,
    manifest: Manifest,
}

impl Bundle {
    /// An empty bundle: no services, an entry module that denies everything.
    pub fn new() -> Self {
        let mut bundle = Self::default();
        bundle.regenerate_main();
        bundle.manifest.roots = vec![ENTRY_ROOT.to_string()];
        bundle
    }

    /// Reassemble a bundle from loaded parts (repository use).
    pub fn from_parts(modules: BTreeMap<String, String>, manifest: Manifest) -> Self {
        Self { modules, manifest }
    }

    pub fn modules(&self) -> &BTreeMap<String, String> {
        &self.modules
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Canonical ordered service list.
    pub fn services(&self) -> &[String] {
        &self.manifest.services
    }

    /// Idempotent upsert of a service: render its modules, merge them in,
    /// regenerate the entry module and compile the whole bundle. `self` is
    /// untouched on any failure.
    pub fn with_service(&self, service: &Service) -> Result<Bundle, BundlerError> {
        let rendered = render::render_service(service)?;

        let mut next = self.clone();
        if !next.manifest.services.contains(&service.name) {
            next.manifest.services.push(service.name.clone());
        }
        for (path, source) in rendered {
            next.modules.insert(path, source);
        }
        next.regenerate_main();
        next.recompute_roots();
        next.compile()?;

        tracing::info!(service = %service.name, modules = next.modules.len(), "service added to bundle");
        Ok(next)
    }

    /// Remove a service and every module under its path prefix. Fails with
    /// `NotFound` when the service is not in the bundle.
    pub fn without_service(&self, name: &str) -> Result<Bundle, BundlerError> {
        if !self.manifest.services.iter().any(|s| s == name) {
            return Err(BundlerError::NotFound(format!("service `{name}`")));
        }

        let prefix = format!("/{name}/");
        let mut next = self.clone();
        next.modules
            .retain(|path, _| !path.starts_with(&prefix) && path != MAIN_MODULE);
        next.manifest.services.retain(|s| s != name);
        next.regenerate_main();
        next.recompute_roots();
        next.compile()?;

        tracing::info!(service = %name, "service removed from bundle");
        Ok(next)
    }

    /// Parse and check every module as one unit. Any failure is a
    /// `CompileFailed` naming the offending module.
    pub fn compile(&self) -> Result<(), BundlerError> {
        let mut engine = regorus::Engine::new();
        for (path, source) in &self.modules {
            engine
                .add_policy(path.clone(), source.clone())
                .map_err(|e| BundlerError::CompileFailed(format!("{path}: {e}")))?;
        }
        Ok(())
    }

    /// Rebuild the entry module: one import and one allow rule per service,
    /// deny by default.
    fn regenerate_main(&mut self) {
        let mut main = String::from("package envoy.authz\n\nimport rego.v1\n");

        for service in &self.manifest.services {
            main.push_str(&format!("\nimport data.{service}"));
        }
        if !self.manifest.services.is_empty() {
            main.push('\n');
        }

        main.push_str("\ndefault allow := false\n");
        for service in &self.manifest.services {
            main.push_str(&format!("\nallow if {service}.{ENTRY_PREDICATE}\n"));
        }

        self.modules.insert(MAIN_MODULE.to_string(), main);
    }

    /// Roots are the service packages plus the entry package, in service
    /// order; the manifest service list and roots must always agree.
    fn recompute_roots(&mut self) {
        let mut roots = self.manifest.services.clone();
        roots.push(ENTRY_ROOT.to_string());
        self.manifest.roots = roots;
    }
}
