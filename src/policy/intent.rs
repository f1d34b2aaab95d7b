use serde_json::{Map, Value};

use crate::errors::BundlerError;
use crate::policy::model::{GeneralPolicies, PolicyClause};

/// Extension carrying access-control intent.
const POLICIES_EXTENSION: &str = "x-teadal-policies";
/// Extension on the bearer security scheme carrying the OIDC discovery URL.
const IDP_EXTENSION: &str = "x-teadal-IAM-provider";
/// Key inside the policies extension holding the clause list.
const ACCESS_POLICIES: &str = "access-policies";

/// Operation keys recognized on a path item.
const METHODS: &[&str] = &[
    "get", "put", "post", "delete", "options", "head", "patch", "trace",
];

/// Parse an annotated OpenAPI v3 document into its policy tree and
/// identity-provider discovery URL.
///
/// Accepts YAML or JSON bytes. Policy extensions are read from the paths
/// object, from each path item and from each operation; the identity
/// provider comes from the `bearerAuth` security scheme under components.
pub fn parse_document(bytes: &[u8]) -> Result<(GeneralPolicies, String), BundlerError> {
    let doc: Value = serde_yaml::from_slice(bytes)
        .map_err(|e| BundlerError::ParseFailed(e.to_string()))?;

    let root = doc
        .as_object()
        .ok_or_else(|| BundlerError::ParseFailed("document is not a mapping".to_string()))?;

    let version = root
        .get("openapi")
        .and_then(Value::as_str)
        .ok_or_else(|| BundlerError::ParseFailed("missing `openapi` version field".to_string()))?;
    if !version.starts_with('3') {
        return Err(BundlerError::ParseFailed(format!(
            "unsupported OpenAPI version `{version}` (expected 3.x)"
        )));
    }

    let mut general = GeneralPolicies::default();

    if let Some(paths) = root.get("paths").and_then(Value::as_object) {
        if let Some(clauses) = extension_clauses(paths, "paths")? {
            general.clauses = clauses;
        }

        for (path, item) in paths.iter().filter(|(k, _)| k.starts_with('/')) {
            let Some(item) = item.as_object() else {
                return Err(BundlerError::ParseFailed(format!(
                    "path item `{path}` is not a mapping"
                )));
            };

            if let Some(clauses) = extension_clauses(item, path)? {
                general.path_entry(path).clauses = clauses;
            }

            for method in METHODS {
                let Some(op) = item.get(*method).and_then(Value::as_object) else {
                    continue;
                };
                let node = format!("{path}.{method}");
                if let Some(clauses) = extension_clauses(op, &node)? {
                    general.path_entry(path).method_entry(method).clauses = clauses;
                }
            }
        }
    }

    let idp = identity_provider(root)?;
    Ok((general, idp))
}

/// Decode the clause list from the policies extension on `node`, if present.
/// More than one `x-` extension on the same node is ambiguous intent; warn
/// and honor only the policies extension.
fn extension_clauses(
    node: &Map<String, Value>,
    where_: &str,
) -> Result<Option<Vec<PolicyClause>>, BundlerError> {
    let extensions = node.keys().filter(|k| k.starts_with("x-")).count();
    if extensions > 1 {
        tracing::warn!(
            node = where_,
            extensions,
            "multiple extensions on one node; only `{}` is honored",
            POLICIES_EXTENSION
        );
    }

    let Some(ext) = node.get(POLICIES_EXTENSION) else {
        return Ok(None);
    };

    let Some(list) = ext.get(ACCESS_POLICIES) else {
        return Ok(Some(Vec::new()));
    };
    let list = list.as_array().ok_or_else(|| {
        BundlerError::MalformedClause(format!("`{ACCESS_POLICIES}` at `{where_}` is not a list"))
    })?;

    let mut clauses = Vec::with_capacity(list.len());
    for entry in list {
        let clause = PolicyClause::from_value(entry)
            .map_err(|e| BundlerError::MalformedClause(format!("at `{where_}`: {e}")))?;
        clauses.push(clause);
    }
    Ok(Some(clauses))
}

/// Read the identity-provider URL from the `bearerAuth` security scheme.
fn identity_provider(root: &Map<String, Value>) -> Result<String, BundlerError> {
    let scheme = root
        .get("components")
        .and_then(|c| c.get("securitySchemes"))
        .and_then(|s| s.get("bearerAuth"))
        .ok_or(BundlerError::MissingIdentityProvider)?;

    scheme
        .get(IDP_EXTENSION)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(BundlerError::MissingIdentityProvider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::model::{Operator, PolicyAtom};

    const MINIMAL: &str = r#"
openapi: "3.0.3"
info:
  title: httpbin
  version: "1.0"
paths: {}
components:
  securitySchemes:
    bearerAuth:
      type: http
      scheme: bearer
      x-teadal-IAM-provider: "http://localhost/keycloak/realms/master/.well-known/openid-configuration"
"#;

    #[test]
    fn test_parse_minimal_document() {
        let (general, idp) = parse_document(MINIMAL.as_bytes()).unwrap();
        assert!(general.is_empty());
        assert_eq!(
            idp,
            "http://localhost/keycloak/realms/master/.well-known/openid-configuration"
        );
    }

    #[test]
    fn test_parse_rejects_non_v3() {
        let doc = r#"
swagger: "2.0"
paths: {}
"#;
        let err = parse_document(doc.as_bytes()).unwrap_err();
        assert!(matches!(err, BundlerError::ParseFailed(_)));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = parse_document(b"{ not yaml: [").unwrap_err();
        assert!(matches!(err, BundlerError::ParseFailed(_)));
    }

    #[test]
    fn test_missing_security_scheme() {
        let doc = r#"
openapi: "3.0.3"
paths: {}
components: {}
"#;
        let err = parse_document(doc.as_bytes()).unwrap_err();
        assert!(matches!(err, BundlerError::MissingIdentityProvider));
    }

    #[test]
    fn test_missing_idp_extension() {
        let doc = r#"
openapi: "3.0.3"
paths: {}
components:
  securitySchemes:
    bearerAuth:
      type: http
      scheme: bearer
"#;
        let err = parse_document(doc.as_bytes()).unwrap_err();
        assert!(matches!(err, BundlerError::MissingIdentityProvider));
    }

    #[test]
    fn test_scoped_policies() {
        let doc = r#"
openapi: "3.0.3"
paths:
  x-teadal-policies:
    access-policies:
      - storage-location:
          operator: OR
          values: [Europe, USA]
  /bearer:
    x-teadal-policies:
      access-policies:
        - role:
            operator: OR
            values: [role1]
    get:
      x-teadal-policies:
        access-policies:
          - user:
              operator: OR
              values: [user1@teadal.eu, user2@teadal.eu]
      responses:
        "200":
          description: ok
  /anything:
    get:
      responses:
        "200":
          description: ok
components:
  securitySchemes:
    bearerAuth:
      type: http
      scheme: bearer
      x-teadal-IAM-provider: "http://idp.local/.well-known/openid-configuration"
"#;
        let (general, _) = parse_document(doc.as_bytes()).unwrap();

        assert_eq!(general.clauses.len(), 1);
        assert!(matches!(
            general.clauses[0].atoms[0],
            PolicyAtom::StorageLocation { operator: Operator::Or, .. }
        ));

        // only the annotated path is specialized
        assert_eq!(general.specialized_paths.len(), 1);
        let bearer = &general.specialized_paths["/bearer"];
        assert_eq!(bearer.clauses.len(), 1);
        assert_eq!(bearer.specialized_methods.len(), 1);

        let get = &bearer.specialized_methods["get"];
        assert_eq!(get.path, "/bearer");
        assert_eq!(get.method, "get");
        assert!(matches!(
            get.clauses[0].atoms[0],
            PolicyAtom::User { operator: Operator::Or, ref values } if values.len() == 2
        ));
    }

    #[test]
    fn test_operation_policy_materializes_path_entry() {
        let doc = r#"
openapi: "3.0.3"
paths:
  /anything:
    get:
      x-teadal-policies:
        access-policies:
          - role:
              operator: AND
              values: [auditor]
      responses:
        "200":
          description: ok
components:
  securitySchemes:
    bearerAuth:
      type: http
      scheme: bearer
      x-teadal-IAM-provider: "http://idp.local/.well-known/openid-configuration"
"#;
        let (general, _) = parse_document(doc.as_bytes()).unwrap();
        let path = &general.specialized_paths["/anything"];
        assert!(path.clauses.is_empty());
        assert_eq!(path.specialized_methods["get"].clauses.len(), 1);
    }

    #[test]
    fn test_malformed_clause() {
        let doc = r#"
openapi: "3.0.3"
paths:
  /bearer:
    x-teadal-policies:
      access-policies:
        - user: "not an object"
components:
  securitySchemes:
    bearerAuth:
      type: http
      scheme: bearer
      x-teadal-IAM-provider: "http://idp.local/.well-known/openid-configuration"
"#;
        let err = parse_document(doc.as_bytes()).unwrap_err();
        assert!(matches!(err, BundlerError::MalformedClause(_)));
    }

    #[test]
    fn test_extension_without_access_policies_is_empty() {
        let doc = r#"
openapi: "3.0.3"
paths:
  /bearer:
    x-teadal-policies: {}
components:
  securitySchemes:
    bearerAuth:
      type: http
      scheme: bearer
      x-teadal-IAM-provider: "http://idp.local/.well-known/openid-configuration"
"#;
        let (general, _) = parse_document(doc.as_bytes()).unwrap();
        assert!(general.specialized_paths["/bearer"].clauses.is_empty());
    }

    #[test]
    fn test_accepts_json_documents() {
        let doc = serde_json::json!({
            "openapi": "3.1.0",
            "paths": {},
            "components": { "securitySchemes": { "bearerAuth": {
                "type": "http",
                "scheme": "bearer",
                "x-teadal-IAM-provider": "http://idp.local/.well-known/openid-configuration"
            }}}
        });
        let bytes = serde_json::to_vec(&doc).unwrap();
        let (general, idp) = parse_document(&bytes).unwrap();
        assert!(general.is_empty());
        assert!(idp.starts_with("http://idp.local"));
    }
}
