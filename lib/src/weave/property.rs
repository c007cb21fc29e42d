use super::existing_guard::has_existing_guard;
use super::guard::{prepend_hidden, GuardError, GuardSubject, GuardSynthesizer, Terminator};
use super::return_points::return_points;
use super::{MethodPolicy, ValidationFlags};
use crate::il::code::MethodBody;
use crate::il::type_graph::{MethodData, SystemLibrary};
use crate::il::{FullName, TypeSig};

/// Guards property accessors, with messages naming the property
pub struct PropertyProcessor<'a, 'g> {
    pub synthesizer: &'a GuardSynthesizer<'a, 'g>,
    pub system: &'a SystemLibrary<'g>,
}

impl<'a, 'g> PropertyProcessor<'a, 'g> {
    /// Guard the value assigned by a setter, or the value returned by a getter
    ///
    /// Methods which aren't accessors are left untouched.
    pub fn inject_accessor_guards(
        &self,
        method: &MethodData<'g>,
        policy: &MethodPolicy,
        body: &mut MethodBody<'g>,
        document: Option<&str>,
    ) -> usize {
        if method.is_setter() {
            self.guard_setter(method, policy, body, document)
        } else if method.is_getter() {
            self.guard_getter(method, policy, body, document)
        } else {
            0
        }
    }

    fn guard_setter(
        &self,
        method: &MethodData<'g>,
        policy: &MethodPolicy,
        body: &mut MethodBody<'g>,
        document: Option<&str>,
    ) -> usize {
        if !policy.has(ValidationFlags::ARGUMENTS) {
            return 0;
        }
        let value = match method.setter_value_parameter() {
            Some(value) => value,
            None => return 0,
        };
        let value_idx = method.parameters.len() - 1;
        if !policy.must_guard_parameter(value)
            || has_existing_guard(&body.instructions, &value.name, self.system)
        {
            return 0;
        }
        let entry = match body.first_id() {
            Some(entry) => entry,
            None => return 0,
        };

        let message = format!(
            "[NullGuard] Cannot set the value of property '{}' to null.",
            property_full_name(method, &value.ty, &method.parameters[..value_idx])
        );
        let fragment = self.synthesizer.build(
            body,
            GuardSubject::Argument(method.argument_index(value_idx), &value.ty),
            &message,
            GuardError::ArgumentNull {
                parameter_name: &value.name,
            },
            entry,
            Terminator::Throw,
        );
        prepend_hidden(body, fragment, document);
        1
    }

    fn guard_getter(
        &self,
        method: &MethodData<'g>,
        policy: &MethodPolicy,
        body: &mut MethodBody<'g>,
        document: Option<&str>,
    ) -> usize {
        if !policy.must_guard_return(method, &method.return_type) {
            return 0;
        }

        let message = format!(
            "[NullGuard] Return value of property '{}' is null.",
            property_full_name(method, &method.return_type, &method.parameters)
        );
        let points: Vec<usize> = return_points(&body.instructions).collect();
        for &ret in &points {
            self.synthesizer.inject_return_guard(
                body,
                ret,
                &method.return_type,
                &message,
                Terminator::Throw,
                document,
            );
        }
        points.len()
    }
}

/// Property name as `PropertyType DeclaringType::Name(IndexTypes)`
fn property_full_name(
    accessor: &MethodData<'_>,
    property_type: &TypeSig<'_>,
    index_parameters: &[crate::il::type_graph::ParameterData<'_>],
) -> String {
    let mut name = property_type.full_name();
    name.push(' ');
    accessor.declaring_type.full_name_to(&mut name);
    name.push_str("::");
    name.push_str(accessor.property_name().unwrap_or(&accessor.name));
    name.push('(');
    for (idx, parameter) in index_parameters.iter().enumerate() {
        if idx > 0 {
            name.push(',');
        }
        parameter.ty.full_name_to(&mut name);
    }
    name.push(')');
    name
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::il::type_graph::{ParameterData, TypeData, TypeGraph, TypeGraphArenas, TypeKind};
    use crate::il::{MethodAccessFlags, TypeAccessFlags};

    #[test]
    fn property_names() {
        let arenas = TypeGraphArenas::new();
        let graph = TypeGraph::new(&arenas);
        let system = graph.insert_system_types();
        let string = TypeSig::Named(system.classes.string);
        let int = TypeSig::Named(system.classes.int32);

        let ty = graph.add_type(TypeData::new(
            "Shop",
            "Catalog",
            TypeKind::Class,
            TypeAccessFlags::PUBLIC,
            None,
        ));
        let accessor = MethodAccessFlags::PUBLIC | MethodAccessFlags::SPECIAL_NAME;
        let get_title = graph.add_method(MethodData::new(
            ty,
            "get_Title",
            accessor,
            string.clone(),
            vec![],
        ));
        let set_item = graph.add_method(MethodData::new(
            ty,
            "set_Item",
            accessor,
            TypeSig::Void,
            vec![
                ParameterData::new("index", int.clone()),
                ParameterData::new("value", string.clone()),
            ],
        ));

        assert_eq!(
            property_full_name(get_title, &string, &get_title.parameters),
            "System.String Shop.Catalog::Title()"
        );
        assert_eq!(
            property_full_name(set_item, &string, &set_item.parameters[..1]),
            "System.String Shop.Catalog::Item(System.Int32)"
        );
    }
}
