use super::type_graph::TypeData;

/// Render the fully qualified name used in messages and member references
///
/// Names follow the container's conventions: namespaces are joined with `.`, nested types with
/// `/`, generic instantiations list their arguments in angle brackets.
pub trait FullName {
    /// Write the full name into an existing buffer
    fn full_name_to(&self, write_to: &mut String);

    /// Render the full name into a fresh string
    fn full_name(&self) -> String {
        let mut full_name = String::new();
        self.full_name_to(&mut full_name);
        full_name
    }
}

/// Type as it appears in a signature
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum TypeSig<'g> {
    /// Absence of a value (only valid as a return type)
    Void,

    /// Non-generic type definition
    Named(&'g TypeData<'g>),

    /// Generic parameter of the enclosing type or method
    ///
    /// A parameter constrained to value types is never null.
    GenericParam { name: String, value_type: bool },

    /// Managed pointer (`ref` and `out` parameters)
    ByRef(Box<TypeSig<'g>>),

    /// Single-dimensional zero-based array
    Array(Box<TypeSig<'g>>),

    /// Instantiation of a generic type definition
    GenericInstance(&'g TypeData<'g>, Vec<TypeSig<'g>>),
}

impl<'g> TypeSig<'g> {
    pub fn is_void(&self) -> bool {
        matches!(self, TypeSig::Void)
    }

    pub fn is_generic_param(&self) -> bool {
        matches!(self, TypeSig::GenericParam { .. })
    }

    /// Values of this type are copied inline (and so can never be null)
    pub fn is_value_type(&self) -> bool {
        match self {
            TypeSig::Void => true,
            TypeSig::Named(ty) | TypeSig::GenericInstance(ty, _) => ty.is_value_type(),
            TypeSig::GenericParam { value_type, .. } => *value_type,
            TypeSig::ByRef(_) | TypeSig::Array(_) => false,
        }
    }

    /// Can a value of this type be null?
    ///
    /// Managed pointers classify by what they point at.
    pub fn is_ref_type(&self) -> bool {
        match self {
            TypeSig::ByRef(element) => element.is_ref_type(),
            other => !other.is_value_type(),
        }
    }

    /// Type pointed to by a managed pointer, or the type itself
    pub fn element_type(&self) -> &TypeSig<'g> {
        match self {
            TypeSig::ByRef(element) => element,
            other => other,
        }
    }

    /// Type definition behind a named type or generic instantiation
    pub fn definition(&self) -> Option<&'g TypeData<'g>> {
        match self {
            TypeSig::Named(ty) | TypeSig::GenericInstance(ty, _) => Some(ty),
            _ => None,
        }
    }
}

impl<'g> FullName for TypeSig<'g> {
    fn full_name_to(&self, write_to: &mut String) {
        match self {
            TypeSig::Void => write_to.push_str("System.Void"),
            TypeSig::Named(ty) => ty.full_name_to(write_to),
            TypeSig::GenericParam { name, .. } => write_to.push_str(name),
            TypeSig::ByRef(element) => {
                element.full_name_to(write_to);
                write_to.push('&');
            }
            TypeSig::Array(element) => {
                element.full_name_to(write_to);
                write_to.push_str("[]");
            }
            TypeSig::GenericInstance(ty, arguments) => {
                ty.full_name_to(write_to);
                write_to.push('<');
                for (idx, argument) in arguments.iter().enumerate() {
                    if idx > 0 {
                        write_to.push(',');
                    }
                    argument.full_name_to(write_to);
                }
                write_to.push('>');
            }
        }
    }
}
