//! Literal-output checks: annotated descriptions in, generated Rego out.

use teadal_bundler::policy::{intent, render, Service};

const BEARER_SPEC: &str = r#"
openapi: "3.0.3"
info:
  title: httpbin
  version: "1.0"
paths:
  x-teadal-policies:
    access-policies:
      - storage-location:
          operator: OR
          values: [Europe, USA]
  /bearer:
    get:
      x-teadal-policies:
        access-policies:
          - role:
              operator: OR
              values: [role3, role2]
            user:
              operator: OR
              values: [user1@teadal.eu, user2@teadal.eu]
      responses:
        "200":
          description: ok
components:
  securitySchemes:
    bearerAuth:
      type: http
      scheme: bearer
      x-teadal-IAM-provider: "http://localhost/keycloak/realms/master/.well-known/openid-configuration"
"#;

fn rendered_modules(name: &str, spec: &str) -> Vec<(String, String)> {
    let (policies, idp_url) = intent::parse_document(spec.as_bytes()).unwrap();
    render::render_service(&Service::new(name, idp_url, policies)).unwrap()
}

#[test]
fn test_specialized_path_and_method_rules() {
    let modules = rendered_modules("httpbin", BEARER_SPEC);
    let (_, service_module) = modules
        .iter()
        .find(|(path, _)| path == "/httpbin/service.rego")
        .unwrap();

    // the method-scope rule pins path and method and carries both checks
    let method_rule = service_module
        .split("\n\n")
        .find(|rule| rule.contains(r#"method == "get""#))
        .expect("method-scope rule present");
    assert!(method_rule.contains(r#"path == "/bearer""#));
    assert!(method_rule.contains(r#"count({"role3", "role2"} & roles) > 0"#));
    assert!(method_rule.contains(r#"user in {"user1@teadal.eu", "user2@teadal.eu"}"#));

    // the general rule carves out the specialized path
    let general_rule = service_module
        .split("\n\n")
        .find(|rule| rule.contains("not path in"))
        .expect("general rule present");
    assert!(general_rule.contains(r#"not path in ["/bearer"]"#));
    assert!(!general_rule.contains("path =="));
}

#[test]
fn test_service_module_shape() {
    let modules = rendered_modules("httpbin", BEARER_SPEC);
    let (_, service_module) = modules
        .iter()
        .find(|(path, _)| path == "/httpbin/service.rego")
        .unwrap();

    assert!(service_module.starts_with("package httpbin\n"));
    assert!(service_module.contains("default allow_request := false"));
    assert!(service_module.contains("default allow_policies := false"));
    assert!(service_module.contains("method := lower(input.attributes.request.http.method)"));
    assert!(service_module
        .contains(r#"path := trim_prefix(input.attributes.request.http.path, "/httpbin")"#));
}

#[test]
fn test_idp_url_lands_in_oidc_module() {
    let modules = rendered_modules("httpbin", BEARER_SPEC);
    let (_, oidc_module) = modules
        .iter()
        .find(|(path, _)| path == "/httpbin/oidc.rego")
        .unwrap();

    assert!(oidc_module.contains(
        r#""url": "http://localhost/keycloak/realms/master/.well-known/openid-configuration""#
    ));
    assert!(oidc_module.contains("\"force_cache_duration_seconds\": 86400"));
    assert!(oidc_module.contains("\"force_cache_duration_seconds\": 3600"));
    assert!(oidc_module.contains("io.jwt.decode_verify"));
}
