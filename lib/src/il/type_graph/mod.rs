use super::code::MethodBody;
use super::{
    has_attribute, CustomAttribute, FieldAccessFlags, FullName, MethodAccessFlags,
    TypeAccessFlags, TypeSig,
};
use elsa::FrozenVec;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::fmt::Debug;
use typed_arena::Arena;

mod system_types;

pub use system_types::*;

pub struct TypeGraphArenas<'g> {
    type_arena: Arena<TypeData<'g>>,
    method_arena: Arena<MethodData<'g>>,
    field_arena: Arena<FieldData<'g>>,
}

impl<'g> TypeGraphArenas<'g> {
    pub fn new() -> Self {
        TypeGraphArenas {
            type_arena: Arena::new(),
            method_arena: Arena::new(),
            field_arena: Arena::new(),
        }
    }
}

impl<'g> Default for TypeGraphArenas<'g> {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks the types of a module and the members declared on those types
///
/// Everything is allocated in arenas that outlive the graph, so types and members can refer to
/// each other freely through `&'g` references. The graph only ever grows. Method bodies are the
/// one mutable part: each sits in its own `RefCell` so the weaver can rewrite it in place.
pub struct TypeGraph<'g> {
    arenas: &'g TypeGraphArenas<'g>,
    types: RefCell<HashMap<String, &'g TypeData<'g>>>,
    declaration_order: RefCell<Vec<&'g TypeData<'g>>>,
}

impl<'g> TypeGraph<'g> {
    /// New empty graph
    pub fn new(arenas: &'g TypeGraphArenas<'g>) -> Self {
        TypeGraph {
            arenas,
            types: RefCell::new(HashMap::new()),
            declaration_order: RefCell::new(vec![]),
        }
    }

    /// Find a type from its full name (nested types use `/`)
    pub fn lookup_type(&self, full_name: &str) -> Option<&'g TypeData<'g>> {
        self.types.borrow().get(full_name).copied()
    }

    /// All types, in the order they were added
    pub fn types(&self) -> Vec<&'g TypeData<'g>> {
        self.declaration_order.borrow().clone()
    }

    /// Add a new type to the graph (and to its declaring type, if nested)
    pub fn add_type(&self, data: TypeData<'g>) -> &'g TypeData<'g> {
        let data = &*self.arenas.type_arena.alloc(data);
        if let Some(declaring_type) = data.declaring_type {
            declaring_type.nested_types.push(data);
        }
        self.types.borrow_mut().insert(data.full_name(), data);
        self.declaration_order.borrow_mut().push(data);
        data
    }

    /// Add a field to the graph and to its type
    pub fn add_field(&self, field: FieldData<'g>) -> &'g FieldData<'g> {
        let data = &*self.arenas.field_arena.alloc(field);
        data.declaring_type.fields.push(data);
        data
    }

    /// Add a method to the graph and to its type
    pub fn add_method(&self, method: MethodData<'g>) -> &'g MethodData<'g> {
        let data = &*self.arenas.method_arena.alloc(method);
        data.declaring_type.methods.push(data);
        data
    }

    /// Add the well-known system types and members the weaver refers to
    pub fn insert_system_types(&self) -> SystemLibrary<'g> {
        SystemLibrary::add_to_graph(self)
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum TypeKind {
    Class,
    Interface,
    ValueType,
}

pub struct TypeData<'g> {
    /// Simple name of the type (including any generic arity suffix, eg. `Task`1`)
    pub name: String,

    /// Namespace (empty for nested types and for types in the global namespace)
    pub namespace: String,

    /// Enclosing type, for nested types
    pub declaring_type: Option<&'g TypeData<'g>>,

    pub kind: TypeKind,

    pub access_flags: TypeAccessFlags,

    /// Names of the generic parameters declared on the type
    pub generic_parameters: Vec<String>,

    /// Base type is only ever missing for `System.Object` and interfaces
    ///
    /// This is a cell since base types may be declared after the types deriving from them.
    pub base_type: Cell<Option<&'g TypeData<'g>>>,

    /// Interfaces implemented (or super-interfaces)
    pub interfaces: FrozenVec<&'g TypeData<'g>>,

    pub nested_types: FrozenVec<&'g TypeData<'g>>,

    pub methods: FrozenVec<&'g MethodData<'g>>,

    pub fields: FrozenVec<&'g FieldData<'g>>,

    pub attributes: Vec<CustomAttribute>,
}

impl<'g> TypeData<'g> {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        kind: TypeKind,
        access_flags: TypeAccessFlags,
        declaring_type: Option<&'g TypeData<'g>>,
    ) -> TypeData<'g> {
        TypeData {
            name: name.into(),
            namespace: namespace.into(),
            declaring_type,
            kind,
            access_flags,
            generic_parameters: vec![],
            base_type: Cell::new(None),
            interfaces: FrozenVec::new(),
            nested_types: FrozenVec::new(),
            methods: FrozenVec::new(),
            fields: FrozenVec::new(),
            attributes: vec![],
        }
    }

    pub fn is_value_type(&self) -> bool {
        self.kind == TypeKind::ValueType
    }

    pub fn is_interface(&self) -> bool {
        self.kind == TypeKind::Interface
    }

    /// Is the type visible outside its assembly?
    pub fn is_public_or_nested_public(&self) -> bool {
        if self.access_flags.contains(TypeAccessFlags::PUBLIC) {
            return true;
        }
        match self.declaring_type {
            Some(declaring_type) => {
                self.access_flags.contains(TypeAccessFlags::NESTED_PUBLIC)
                    && declaring_type.is_public_or_nested_public()
            }
            None => false,
        }
    }

    pub fn has_attribute(&self, simple_name: &str) -> bool {
        has_attribute(&self.attributes, simple_name)
    }

    /// Was the type emitted by a compiler or code generator (or nested in such a type)?
    pub fn is_generated_code(&self) -> bool {
        if self.has_attribute(CustomAttribute::COMPILER_GENERATED)
            || self.has_attribute(CustomAttribute::GENERATED_CODE)
        {
            return true;
        }
        self.declaring_type
            .map_or(false, |declaring_type| declaring_type.is_generated_code())
    }

    /// Is this type, one of its base types, or one of their interfaces the given type?
    pub fn is_subtype_of(&self, other: &TypeData<'g>) -> bool {
        let mut next_type = Some(self);
        while let Some(ty) = next_type {
            if ty == other {
                return true;
            }
            if ty.interfaces.iter().any(|interface| interface.is_subtype_of(other)) {
                return true;
            }
            next_type = ty.base_type.get();
        }
        false
    }

    /// Find a method declared on this type by name and parameter count
    pub fn find_method(&'g self, name: &str, arity: usize) -> Option<&'g MethodData<'g>> {
        self.methods
            .iter()
            .find(|method| method.name == name && method.parameters.len() == arity)
    }

    /// Methods declared on this type with the given name
    pub fn methods_named<'a>(
        &'g self,
        name: &'a str,
    ) -> impl Iterator<Item = &'g MethodData<'g>> + 'a
    where
        'g: 'a,
    {
        self.methods.iter().filter(move |method| method.name == name)
    }

    /// Find a field declared on this type
    pub fn find_field(&'g self, name: &str) -> Option<&'g FieldData<'g>> {
        self.fields.iter().find(|field| field.name == name)
    }
}

impl<'g> PartialEq for TypeData<'g> {
    fn eq(&self, other: &TypeData<'g>) -> bool {
        self.name == other.name
            && self.namespace == other.namespace
            && self.declaring_type == other.declaring_type
    }
}

impl<'g> Eq for TypeData<'g> {}

impl<'g> FullName for TypeData<'g> {
    fn full_name_to(&self, write_to: &mut String) {
        if let Some(declaring_type) = self.declaring_type {
            declaring_type.full_name_to(write_to);
            write_to.push('/');
        } else if !self.namespace.is_empty() {
            write_to.push_str(&self.namespace);
            write_to.push('.');
        }
        write_to.push_str(&self.name);
    }
}

impl<'g> Debug for TypeData<'g> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name())
    }
}

pub struct MethodData<'g> {
    /// Type declaring the method
    ///
    /// Note: this is a pointer back to the type (so don't derive `Debug`)
    pub declaring_type: &'g TypeData<'g>,

    pub name: String,

    pub access_flags: MethodAccessFlags,

    pub return_type: TypeSig<'g>,

    /// Attributes on the return value (as opposed to on the method)
    pub return_attributes: Vec<CustomAttribute>,

    pub parameters: Vec<ParameterData<'g>>,

    pub attributes: Vec<CustomAttribute>,

    /// Body of the method, missing for abstract and external methods
    pub body: RefCell<Option<MethodBody<'g>>>,
}

impl<'g> MethodData<'g> {
    pub fn new(
        declaring_type: &'g TypeData<'g>,
        name: impl Into<String>,
        access_flags: MethodAccessFlags,
        return_type: TypeSig<'g>,
        parameters: Vec<ParameterData<'g>>,
    ) -> MethodData<'g> {
        MethodData {
            declaring_type,
            name: name.into(),
            access_flags,
            return_type,
            return_attributes: vec![],
            parameters,
            attributes: vec![],
            body: RefCell::new(None),
        }
    }

    pub fn is_static(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::STATIC)
    }

    /// Does argument slot 0 hold the receiver?
    pub fn has_this(&self) -> bool {
        !self.is_static()
    }

    pub fn is_public(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::PUBLIC)
    }

    pub fn is_virtual(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::VIRTUAL)
    }

    pub fn has_body(&self) -> bool {
        self.body.borrow().is_some()
    }

    pub fn is_getter(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::SPECIAL_NAME) && self.name.starts_with("get_")
    }

    pub fn is_setter(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::SPECIAL_NAME) && self.name.starts_with("set_")
    }

    /// Name of the property this method is an accessor for
    pub fn property_name(&self) -> Option<&str> {
        if self.is_getter() || self.is_setter() {
            Some(&self.name[4..])
        } else {
            None
        }
    }

    /// Parameter holding the value assigned by a property setter
    pub fn setter_value_parameter(&self) -> Option<&ParameterData<'g>> {
        if self.is_setter() {
            self.parameters.last()
        } else {
            None
        }
    }

    /// Argument slot of a parameter (shifted past the receiver for instance methods)
    pub fn argument_index(&self, parameter_index: usize) -> u16 {
        (parameter_index + self.has_this() as usize) as u16
    }

    /// Parameter loaded from an argument slot (`None` for the receiver)
    pub fn parameter_of_argument(&self, argument: u16) -> Option<&ParameterData<'g>> {
        let argument = argument as usize;
        if self.has_this() {
            argument
                .checked_sub(1)
                .and_then(|idx| self.parameters.get(idx))
        } else {
            self.parameters.get(argument)
        }
    }

    pub fn has_attribute(&self, simple_name: &str) -> bool {
        has_attribute(&self.attributes, simple_name)
    }

    /// Was the method, or the type it is on, emitted by a compiler or code generator?
    pub fn is_generated_code(&self) -> bool {
        self.has_attribute(CustomAttribute::COMPILER_GENERATED)
            || self.has_attribute(CustomAttribute::GENERATED_CODE)
            || self.declaring_type.is_generated_code()
    }

    /// Do both methods have the same name and parameter types?
    pub fn has_same_signature(&self, other: &MethodData<'g>) -> bool {
        self.name == other.name
            && self.parameters.len() == other.parameters.len()
            && self
                .parameters
                .iter()
                .zip(&other.parameters)
                .all(|(p1, p2)| p1.ty.full_name() == p2.ty.full_name())
    }

    /// Does this virtual method override (or implement) a public method of a public type?
    ///
    /// Base types are searched all the way up, along with every interface reachable from them.
    pub fn is_override_or_implementation_of_public_member(&self) -> bool {
        if !self.is_virtual() {
            return false;
        }

        let mut pending: Vec<&TypeData<'g>> = self.declaring_type.interfaces.iter().collect();
        pending.extend(self.declaring_type.base_type.get());
        while let Some(ty) = pending.pop() {
            if ty.is_public_or_nested_public()
                && ty
                    .methods
                    .iter()
                    .any(|method| method.is_public() && method.has_same_signature(self))
            {
                return true;
            }
            pending.extend(ty.interfaces.iter());
            pending.extend(ty.base_type.get());
        }
        false
    }
}

impl<'g> PartialEq for MethodData<'g> {
    fn eq(&self, other: &MethodData<'g>) -> bool {
        self.declaring_type == other.declaring_type
            && self.return_type == other.return_type
            && self.has_same_signature(other)
    }
}

impl<'g> Eq for MethodData<'g> {}

impl<'g> FullName for MethodData<'g> {
    fn full_name_to(&self, write_to: &mut String) {
        self.return_type.full_name_to(write_to);
        write_to.push(' ');
        self.declaring_type.full_name_to(write_to);
        write_to.push_str("::");
        write_to.push_str(&self.name);
        write_to.push('(');
        for (idx, parameter) in self.parameters.iter().enumerate() {
            if idx > 0 {
                write_to.push(',');
            }
            parameter.ty.full_name_to(write_to);
        }
        write_to.push(')');
    }
}

impl<'g> Debug for MethodData<'g> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name())
    }
}

#[derive(Clone, Debug)]
pub struct ParameterData<'g> {
    pub name: String,

    /// Type of the parameter (`out` parameters are managed pointers)
    pub ty: TypeSig<'g>,

    pub is_out: bool,

    /// Optional parameter whose default value is null
    pub has_null_default: bool,

    pub attributes: Vec<CustomAttribute>,
}

impl<'g> ParameterData<'g> {
    pub fn new(name: impl Into<String>, ty: TypeSig<'g>) -> ParameterData<'g> {
        ParameterData {
            name: name.into(),
            ty,
            is_out: false,
            has_null_default: false,
            attributes: vec![],
        }
    }

    pub fn has_attribute(&self, simple_name: &str) -> bool {
        has_attribute(&self.attributes, simple_name)
    }
}

pub struct FieldData<'g> {
    /// Type declaring the field
    ///
    /// Note: this is a pointer back to the type (so don't derive `Debug`)
    pub declaring_type: &'g TypeData<'g>,

    pub name: String,

    pub ty: TypeSig<'g>,

    pub access_flags: FieldAccessFlags,
}

impl<'g> FieldData<'g> {
    pub fn is_static(&self) -> bool {
        self.access_flags.contains(FieldAccessFlags::STATIC)
    }
}

impl<'g> PartialEq for FieldData<'g> {
    fn eq(&self, other: &FieldData<'g>) -> bool {
        self.declaring_type == other.declaring_type && self.name == other.name
    }
}

impl<'g> Eq for FieldData<'g> {}

impl<'g> FullName for FieldData<'g> {
    fn full_name_to(&self, write_to: &mut String) {
        self.ty.full_name_to(write_to);
        write_to.push(' ');
        self.declaring_type.full_name_to(write_to);
        write_to.push_str("::");
        write_to.push_str(&self.name);
    }
}

impl<'g> Debug for FieldData<'g> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name())
    }
}
