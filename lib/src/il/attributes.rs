/// Custom attribute attached to a type, method, return value or parameter
///
/// Attributes are matched by their simple name: a namespace prefix and an `Attribute` suffix are
/// both ignored, so `System.Diagnostics.CodeAnalysis.AllowNullAttribute` and `AllowNull` are the
/// same attribute.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct CustomAttribute {
    pub name: String,

    /// Constructor arguments, already rendered as strings
    pub arguments: Vec<String>,
}

impl CustomAttribute {
    pub const NULL_GUARD: &'static str = "NullGuard";
    pub const ALLOW_NULL: &'static str = "AllowNull";
    pub const CAN_BE_NULL: &'static str = "CanBeNull";
    pub const NOT_NULL: &'static str = "NotNull";
    pub const COMPILER_GENERATED: &'static str = "CompilerGenerated";
    pub const GENERATED_CODE: &'static str = "GeneratedCode";
    pub const ASYNC_STATE_MACHINE: &'static str = "AsyncStateMachine";
    pub const ITERATOR_STATE_MACHINE: &'static str = "IteratorStateMachine";

    pub fn new(name: impl Into<String>) -> CustomAttribute {
        CustomAttribute {
            name: name.into(),
            arguments: vec![],
        }
    }

    pub fn with_arguments(name: impl Into<String>, arguments: Vec<String>) -> CustomAttribute {
        CustomAttribute {
            name: name.into(),
            arguments,
        }
    }

    /// Name without namespace or `Attribute` suffix
    pub fn simple_name(&self) -> &str {
        let name = match self.name.rfind('.') {
            Some(dot) => &self.name[dot + 1..],
            None => &self.name,
        };
        name.strip_suffix("Attribute").unwrap_or(name)
    }

    pub fn is(&self, simple_name: &str) -> bool {
        self.simple_name() == simple_name
    }
}

/// Find the first attribute with the given simple name
pub fn find_attribute<'a>(
    attributes: &'a [CustomAttribute],
    simple_name: &str,
) -> Option<&'a CustomAttribute> {
    attributes.iter().find(|attribute| attribute.is(simple_name))
}

pub fn has_attribute(attributes: &[CustomAttribute], simple_name: &str) -> bool {
    find_attribute(attributes, simple_name).is_some()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn matches_by_simple_name() {
        let attribute = CustomAttribute::new("System.Diagnostics.CodeAnalysis.AllowNullAttribute");
        assert_eq!(attribute.simple_name(), "AllowNull");
        assert!(attribute.is(CustomAttribute::ALLOW_NULL));
        assert!(!attribute.is(CustomAttribute::NOT_NULL));

        let attributes = vec![
            CustomAttribute::new("CanBeNull"),
            CustomAttribute::with_arguments("NullGuard", vec![String::from("Arguments")]),
        ];
        assert!(has_attribute(&attributes, CustomAttribute::CAN_BE_NULL));
        assert_eq!(
            find_attribute(&attributes, CustomAttribute::NULL_GUARD).map(|a| &a.arguments[..]),
            Some(&[String::from("Arguments")][..])
        );
        assert!(!has_attribute(&attributes, CustomAttribute::COMPILER_GENERATED));
    }
}
