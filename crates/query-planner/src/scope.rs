use crate::helpers::{Directive, Value};
use crate::schema::{ComposedSchema, TypeDef};
use once_cell::unsync::OnceCell;
use std::fmt;
use std::rc::Rc;

/// A chain of type refinements, built while walking fragments and inline fragments.
///
/// Scopes are immutable once built and shared between the fields that reference them. The
/// `enclosing` link only points outwards, towards the operation root.
#[derive(Clone)]
pub(crate) struct Scope<'s>(Rc<ScopeInner<'s>>);

struct ScopeInner<'s> {
    schema: &'s ComposedSchema,
    parent_type: &'s TypeDef,
    directives: Vec<Directive>,
    enclosing: Option<Scope<'s>>,
    runtime_types: OnceCell<Vec<&'s TypeDef>>,
    identity_key: OnceCell<String>,
}

impl<'s> Scope<'s> {
    pub(crate) fn new(
        schema: &'s ComposedSchema,
        parent_type: &'s TypeDef,
        directives: Vec<Directive>,
        enclosing: Option<Scope<'s>>,
    ) -> Self {
        Scope(Rc::new(ScopeInner {
            schema,
            parent_type,
            directives,
            enclosing,
            runtime_types: OnceCell::new(),
            identity_key: OnceCell::new(),
        }))
    }

    pub(crate) fn parent_type(&self) -> &'s TypeDef {
        self.0.parent_type
    }

    pub(crate) fn directives(&self) -> &[Directive] {
        &self.0.directives
    }

    pub(crate) fn enclosing(&self) -> Option<&Scope<'s>> {
        self.0.enclosing.as_ref()
    }

    /// Narrow this scope to `type_def`.
    ///
    /// Enclosing refinements made redundant by `type_def` are pruned from the new chain.
    pub(crate) fn refine(&self, type_def: &'s TypeDef, directives: Vec<Directive>) -> Scope<'s> {
        if directives.is_empty() && type_def == self.parent_type() {
            return self.clone();
        }
        Scope::new(
            self.0.schema,
            type_def,
            directives,
            prune_refined_types(Some(self), type_def),
        )
    }

    /// The object types a value in this scope can have at runtime.
    pub(crate) fn possible_runtime_types(&self) -> &[&'s TypeDef] {
        self.0.runtime_types.get_or_init(|| {
            let schema = self.0.schema;
            let mut types = schema.possible_types(self.parent_type());
            let mut enclosing = self.enclosing();
            while let Some(scope) = enclosing {
                let enclosing_types = scope.possible_runtime_types();
                types.retain(|runtime_type| enclosing_types.contains(runtime_type));
                enclosing = scope.enclosing();
            }
            types
        })
    }

    /// True when a type in this chain is a strict subtype of `type_def`.
    pub(crate) fn is_strictly_refining(&self, type_def: &TypeDef) -> bool {
        let mut scope = Some(self);
        while let Some(current) = scope {
            if current.parent_type() != type_def
                && self.0.schema.is_sub_type(type_def, current.parent_type())
            {
                return true;
            }
            scope = current.enclosing();
        }
        false
    }

    /// A structural key of the whole chain. Fields with the same key can be merged without
    /// wrapping them in an inline fragment.
    pub(crate) fn identity_key(&self) -> &str {
        self.0.identity_key.get_or_init(|| {
            format!(
                "{}-{}-{}",
                self.parent_type().name,
                directives_key(self.directives()),
                self.enclosing()
                    .map(|enclosing| enclosing.identity_key())
                    .unwrap_or_default()
            )
        })
    }
}

impl fmt::Debug for Scope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identity_key())
    }
}

fn prune_refined_types<'s>(to_prune: Option<&Scope<'s>>, refining: &'s TypeDef) -> Option<Scope<'s>> {
    let to_prune = to_prune?;
    let enclosing = prune_refined_types(to_prune.enclosing(), refining);
    if to_prune.directives().is_empty()
        && to_prune
            .0
            .schema
            .is_sub_type(to_prune.parent_type(), refining)
    {
        enclosing
    } else {
        Some(Scope::new(
            to_prune.0.schema,
            to_prune.parent_type(),
            to_prune.directives().to_vec(),
            enclosing,
        ))
    }
}

fn directives_key(directives: &[Directive]) -> String {
    let mut keys = directives
        .iter()
        .map(|directive| {
            let mut arguments = directive
                .arguments
                .iter()
                .map(|(name, value)| format!("{}:{}", name, value_key(value)))
                .collect::<Vec<_>>();
            arguments.sort();
            format!("{}-{}", directive.name, arguments.join(","))
        })
        .collect::<Vec<_>>();
    keys.sort();
    keys.join("-")
}

fn value_key(value: &Value) -> String {
    match value {
        Value::Variable(name) => format!("${}", name),
        Value::Int(number) => format!("i{}", number.as_i64().unwrap_or_default()),
        Value::Float(float) => format!("f{}", float),
        Value::String(string) => format!("s{:?}", string),
        Value::Boolean(boolean) => format!("b{}", boolean),
        Value::Null => "<null>".to_string(),
        Value::Enum(name) => format!("e{}", name),
        Value::List(values) => format!(
            "[{}]",
            values.iter().map(value_key).collect::<Vec<_>>().join(",")
        ),
        Value::Object(fields) => format!(
            "{{{}}}",
            fields
                .iter()
                .map(|(name, value)| format!("{}:{}", name, value_key(value)))
                .collect::<Vec<_>>()
                .join(",")
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::pos;

    fn schema() -> ComposedSchema {
        ComposedSchema::parse(
            r#"
            schema { query: Query }
            type Query { node: Node }
            interface Node { id: ID! }
            interface Named { name: String }
            type A implements Node & Named { id: ID! name: String }
            type B implements Node { id: ID! }
            type C implements Named { name: String }
            "#,
        )
        .unwrap()
    }

    fn include(variable: &str) -> Directive {
        Directive {
            position: pos(),
            name: "include".to_string(),
            arguments: vec![("if".to_string(), Value::Variable(variable.to_string()))],
        }
    }

    fn names(types: &[&TypeDef]) -> Vec<String> {
        types.iter().map(|t| t.name.clone()).collect()
    }

    #[test]
    fn refining_intersects_possible_types() {
        let schema = schema();
        let node = schema.type_by_name("Node").unwrap();
        let named = schema.type_by_name("Named").unwrap();
        let root = Scope::new(&schema, node, vec![], None);
        assert_eq!(names(root.possible_runtime_types()), vec!["A", "B"]);

        let refined = root.refine(named, vec![]);
        assert_eq!(names(refined.possible_runtime_types()), vec!["A"]);
    }

    #[test]
    fn refining_to_unreachable_type_is_empty() {
        let schema = schema();
        let node = schema.type_by_name("Node").unwrap();
        let c = schema.type_by_name("C").unwrap();
        let refined = Scope::new(&schema, node, vec![], None).refine(c, vec![]);
        assert!(refined.possible_runtime_types().is_empty());
    }

    #[test]
    fn refining_to_same_type_without_directives_is_identity() {
        let schema = schema();
        let node = schema.type_by_name("Node").unwrap();
        let root = Scope::new(&schema, node, vec![], None);
        let refined = root.refine(node, vec![]);
        assert!(Rc::ptr_eq(&root.0, &refined.0));
    }

    #[test]
    fn refining_prunes_redundant_enclosing_scopes() {
        let schema = schema();
        let node = schema.type_by_name("Node").unwrap();
        let a = schema.type_by_name("A").unwrap();
        let refined = Scope::new(&schema, node, vec![], None).refine(a, vec![]);
        assert!(refined.enclosing().is_none());
        assert_eq!(refined.identity_key(), "A--");

        let with_directive = Scope::new(&schema, node, vec![include("x")], None).refine(a, vec![]);
        assert!(with_directive.enclosing().is_some());
        assert_eq!(with_directive.identity_key(), "A--Node-include-if:$x-");
    }

    #[test]
    fn strictly_refining() {
        let schema = schema();
        let node = schema.type_by_name("Node").unwrap();
        let a = schema.type_by_name("A").unwrap();
        let scope = Scope::new(&schema, a, vec![], None);
        assert!(scope.is_strictly_refining(node));
        assert!(!scope.is_strictly_refining(a));
    }

    #[test]
    fn identity_key_sorts_directives() {
        let schema = schema();
        let a = schema.type_by_name("A").unwrap();
        let skip = Directive {
            position: pos(),
            name: "skip".to_string(),
            arguments: vec![("if".to_string(), Value::Boolean(false))],
        };
        let first = Scope::new(&schema, a, vec![include("x"), skip.clone()], None);
        let second = Scope::new(&schema, a, vec![skip, include("x")], None);
        assert_eq!(first.identity_key(), second.identity_key());
        assert_eq!(first.identity_key(), "A-include-if:$x-skip-if:bfalse-");
    }
}
