use std::sync::OnceLock;

use minijinja::{context, Environment, UndefinedBehavior};

use crate::errors::BundlerError;
use crate::policy::lower;
use crate::policy::model::Service;

/// Package names a service may not take: the bundle entry package and the
/// top-level module.
pub const RESERVED_NAMES: &[&str] = &["main", "envoy"];

const OIDC_TEMPLATE: &str = include_str!("../../templates/oidc.rego");
const SERVICE_TEMPLATE: &str = include_str!("../../templates/service.rego");

/// Template environment, compiled once from the embedded assets.
///
/// # Panics
///
/// Panics on a template syntax error. The templates are static assets fixed
/// at build time, so this fires at first render during startup or not at all.
fn environment() -> &'static Environment<'static> {
    static ENV: OnceLock<Environment<'static>> = OnceLock::new();
    ENV.get_or_init(|| {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.add_template("oidc.rego", OIDC_TEMPLATE)
            .expect("embedded oidc template is valid");
        env.add_template("service.rego", SERVICE_TEMPLATE)
            .expect("embedded service template is valid");
        env
    })
}

/// Force template compilation; called at process start so a broken asset
/// fails fast instead of at the first request.
pub fn preload_templates() {
    let _ = environment();
}

/// True when `name` is a usable module package identifier.
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first.is_ascii_alphabetic() || first == '_') {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Render the module set for one service: `/<name>/oidc.rego` and
/// `/<name>/service.rego`, the latter with the lowered policy body appended.
pub fn render_service(service: &Service) -> Result<Vec<(String, String)>, BundlerError> {
    if !is_valid_name(&service.name) || RESERVED_NAMES.contains(&service.name.as_str()) {
        return Err(BundlerError::NameConflict(service.name.clone()));
    }

    let env = environment();
    let render_err =
        |e: minijinja::Error| BundlerError::CompileFailed(format!("template render: {e}"));

    let oidc = env
        .get_template("oidc.rego")
        .map_err(render_err)?
        .render(context! {
            name => service.name,
            idp_url => service.identity_provider_url,
        })
        .map_err(render_err)?;

    let policy_body = lower::lower(&service.policies);
    let module = env
        .get_template("service.rego")
        .map_err(render_err)?
        .render(context! {
            name => service.name,
            policy_body => policy_body,
        })
        .map_err(render_err)?;

    Ok(vec![
        (format!("/{}/oidc.rego", service.name), oidc),
        (format!("/{}/service.rego", service.name), module),
    ])
}
