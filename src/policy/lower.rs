use crate::policy::model::{GeneralPolicies, Operator, PolicyAtom, PolicyClause};

/// Name of the boolean predicate the lowered source defines. The rendered
/// service module requires it together with a valid token.
pub const LOWERED_PREDICATE: &str = "allow_policies";

/// Lower a scoped policy tree into Rego source.
///
/// The output defines `default allow_policies := false` plus one rule per
/// composition entry: general clauses (with a carve-out for specialized
/// paths), general x path cross-products pinned to each specialized path
/// (with a carve-out for specialized methods), and general x path x method
/// cross-products pinned to path and method. An entirely empty tree lowers
/// to a single rule that can never hold.
pub fn lower(policies: &GeneralPolicies) -> String {
    let mut rules: Vec<Vec<String>> = Vec::new();

    if policies.is_empty() {
        rules.push(vec!["false".to_string()]);
        return render(&rules);
    }

    let path_keys: Vec<&str> = policies
        .specialized_paths
        .keys()
        .map(String::as_str)
        .collect();

    // General scope: one rule per clause, excluding specialized paths.
    for clause in &policies.clauses {
        let mut body = clause_lines(clause);
        if !path_keys.is_empty() {
            body.push(format!("not path in {}", array_literal(&path_keys)));
        }
        rules.push(body);
    }

    for (path, pp) in &policies.specialized_paths {
        let method_keys: Vec<&str> = pp
            .specialized_methods
            .keys()
            .map(String::as_str)
            .collect();

        // Path scope: general x path products pinned to this path.
        for combo in combos(&[&policies.clauses, &pp.clauses]) {
            let mut body = vec![format!("path == {}", quote(path))];
            body.extend(combo);
            if !method_keys.is_empty() {
                body.push(format!("not method in {}", array_literal(&method_keys)));
            }
            rules.push(body);
        }

        // Path+method scope: general x path x method products.
        for (method, pmp) in &pp.specialized_methods {
            for combo in combos(&[&policies.clauses, &pp.clauses, &pmp.clauses]) {
                let mut body = vec![
                    format!("path == {}", quote(path)),
                    format!("method == {}", quote(method)),
                ];
                body.extend(combo);
                rules.push(body);
            }
        }
    }

    render(&rules)
}

/// Cross-product of the clause lists, skipping empty factors. With every
/// factor empty the product is the single unconstrained combination.
fn combos(factors: &[&Vec<PolicyClause>]) -> Vec<Vec<String>> {
    let mut out: Vec<Vec<String>> = vec![Vec::new()];
    for factor in factors.iter().filter(|f| !f.is_empty()) {
        let mut next = Vec::with_capacity(out.len() * factor.len());
        for prefix in &out {
            for clause in *factor {
                let mut lines = prefix.clone();
                lines.extend(clause_lines(clause));
                next.push(lines);
            }
        }
        out = next;
    }
    out
}

/// Lower one clause to rule-body lines: the concatenation of its atom
/// fragments, conjoined by the rule body.
fn clause_lines(clause: &PolicyClause) -> Vec<String> {
    clause.atoms.iter().flat_map(atom_lines).collect()
}

fn atom_lines(atom: &PolicyAtom) -> Vec<String> {
    match atom {
        PolicyAtom::User { operator: Operator::And, values } => {
            if values.len() > 1 {
                // Requiring one user to equal several values can never hold;
                // the source operator is emitted verbatim regardless.
                tracing::warn!(
                    values = values.len(),
                    "AND user policy over multiple values is unsatisfiable"
                );
            }
            values.iter().map(|v| format!("user == {}", quote(v))).collect()
        }
        PolicyAtom::User { operator: Operator::Or, values } => {
            vec![format!("user in {}", set_literal(values))]
        }
        PolicyAtom::Role { operator: Operator::And, values } => {
            vec![format!("count({} - roles) == 0", set_literal(values))]
        }
        PolicyAtom::Role { operator: Operator::Or, values } => {
            vec![format!("count({} & roles) > 0", set_literal(values))]
        }
        // Reserved kinds: parsed and carried, compiled to no-ops.
        PolicyAtom::StorageLocation { .. }
        | PolicyAtom::Call { .. }
        | PolicyAtom::Timeliness { .. } => Vec::new(),
    }
}

fn render(rules: &[Vec<String>]) -> String {
    let mut out = format!("default {LOWERED_PREDICATE} := false\n");
    for body in rules {
        out.push_str(&format!("\n{LOWERED_PREDICATE} if {{\n"));
        if body.is_empty() {
            out.push_str("\ttrue\n");
        } else {
            for line in body {
                out.push('\t');
                out.push_str(line);
                out.push('\n');
            }
        }
        out.push_str("}\n");
    }
    out
}

fn quote(s: &str) -> String {
    serde_json::to_string(s).expect("strings always serialize")
}

fn set_literal(values: &[String]) -> String {
    if values.is_empty() {
        // `{}` is an empty object in Rego; the empty set needs the builtin.
        return "set()".to_string();
    }
    let items: Vec<String> = values.iter().map(|v| quote(v)).collect();
    format!("{{{}}}", items.join(", "))
}

fn array_literal(values: &[&str]) -> String {
    let items: Vec<String> = values.iter().map(|v| quote(v)).collect();
    format!("[{}]", items.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::model::PolicyClause;
    use serde_json::json;

    fn clause(v: serde_json::Value) -> PolicyClause {
        PolicyClause::from_value(&v).unwrap()
    }

    #[test]
    fn test_empty_tree_is_identically_false() {
        let out = lower(&GeneralPolicies::default());
        assert!(out.contains("default allow_policies := false"));
        assert!(out.contains("allow_policies if {\n\tfalse\n}"));
    }

    #[test]
    fn test_general_or_user_clause() {
        let mut general = GeneralPolicies::default();
        general.clauses.push(clause(json!({
            "user": { "operator": "OR", "values": ["a@x", "b@x"] }
        })));

        let out = lower(&general);
        assert!(out.contains(r#"user in {"a@x", "b@x"}"#));
        assert!(!out.contains("not path in"));
    }

    #[test]
    fn test_and_user_clause_emits_verbatim() {
        let mut general = GeneralPolicies::default();
        general.clauses.push(clause(json!({
            "user": { "operator": "AND", "values": ["a@x", "b@x"] }
        })));

        let out = lower(&general);
        // both equalities in the same body: unsatisfiable, as specified
        assert!(out.contains("\tuser == \"a@x\"\n\tuser == \"b@x\"\n"));
    }

    #[test]
    fn test_role_operators() {
        let mut general = GeneralPolicies::default();
        general.clauses.push(clause(json!({
            "role": { "operator": "AND", "values": ["r1", "r2"] }
        })));
        general.clauses.push(clause(json!({
            "role": { "operator": "OR", "values": ["r3"] }
        })));

        let out = lower(&general);
        assert!(out.contains(r#"count({"r1", "r2"} - roles) == 0"#));
        assert!(out.contains(r#"count({"r3"} & roles) > 0"#));
    }

    #[test]
    fn test_reserved_atoms_lower_to_noop() {
        let mut general = GeneralPolicies::default();
        general.clauses.push(clause(json!({
            "storage-location": { "operator": "OR", "values": ["Europe", "USA"] }
        })));

        let out = lower(&general);
        // the clause still produces a rule, constrained by nothing
        assert!(out.contains("allow_policies if {\n\ttrue\n}"));
        assert!(!out.contains("Europe"));
    }

    #[test]
    fn test_specialized_path_carveout_and_products() {
        let mut general = GeneralPolicies::default();
        general.clauses.push(clause(json!({
            "role": { "operator": "OR", "values": ["base"] }
        })));
        let entry = general.path_entry("/bearer");
        entry.clauses.push(clause(json!({
            "user": { "operator": "OR", "values": ["a@x"] }
        })));

        let out = lower(&general);
        // general rule excludes the specialized path
        assert!(out.contains("not path in [\"/bearer\"]"));
        // path rule pins the path and conjoins general x path clauses
        let path_rule = out
            .split("\n\n")
            .find(|r| r.contains("path == \"/bearer\""))
            .unwrap();
        assert!(path_rule.contains(r#"count({"base"} & roles) > 0"#));
        assert!(path_rule.contains(r#"user in {"a@x"}"#));
    }

    #[test]
    fn test_specialized_method_scope() {
        let mut general = GeneralPolicies::default();
        let entry = general.path_entry("/bearer");
        entry.method_entry("get").clauses.push(clause(json!({
            "user": { "operator": "OR", "values": ["a@x"] }
        })));

        let out = lower(&general);
        // the path-scope rule excludes the specialized method
        assert!(out.contains("not method in [\"get\"]"));
        // the method-scope rule pins both path and method
        let rule = out
            .split("\n\n")
            .find(|r| r.contains("method == \"get\""))
            .unwrap();
        assert!(rule.contains("path == \"/bearer\""));
        assert!(rule.contains(r#"user in {"a@x"}"#));
    }

    #[test]
    fn test_empty_scopes_degenerate() {
        // only a method-level clause: path and general factors are skipped
        let mut general = GeneralPolicies::default();
        general
            .path_entry("/x")
            .method_entry("post")
            .clauses
            .push(clause(json!({
                "role": { "operator": "OR", "values": ["writer"] }
            })));

        let out = lower(&general);
        let rule = out
            .split("\n\n")
            .find(|r| r.contains("method == \"post\""))
            .unwrap();
        assert!(rule.contains(r#"count({"writer"} & roles) > 0"#));
        // no general rules at all
        assert_eq!(out.matches("allow_policies if {").count(), 2);
    }

    #[test]
    fn test_multiple_general_clauses_cross_specialized_path() {
        let mut general = GeneralPolicies::default();
        general.clauses.push(clause(json!({
            "user": { "operator": "OR", "values": ["a@x"] }
        })));
        general.clauses.push(clause(json!({
            "user": { "operator": "OR", "values": ["b@x"] }
        })));
        general.path_entry("/p").clauses.push(clause(json!({
            "role": { "operator": "OR", "values": ["r"] }
        })));

        let out = lower(&general);
        // 2 general rules + 2x1 path products
        assert_eq!(out.matches("allow_policies if {").count(), 4);
        assert_eq!(out.matches("path == \"/p\"").count(), 2);
    }
}
