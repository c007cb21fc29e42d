use super::{MethodData, ParameterData, TypeData, TypeGraph, TypeKind};
use crate::il::{MethodAccessFlags, TypeAccessFlags, TypeSig};

/// Well-known system types and members the weaver emits references to
pub struct SystemLibrary<'g> {
    pub classes: SystemClasses<'g>,
    pub members: SystemMembers<'g>,
}

impl<'g> SystemLibrary<'g> {
    pub fn add_to_graph(type_graph: &TypeGraph<'g>) -> SystemLibrary<'g> {
        let classes = SystemClasses::add_to_graph(type_graph);
        let members = SystemMembers::add_to_graph(type_graph, &classes);
        SystemLibrary { classes, members }
    }
}

pub struct SystemClasses<'g> {
    pub object: &'g TypeData<'g>,
    pub value_type: &'g TypeData<'g>,
    pub string: &'g TypeData<'g>,
    pub boolean: &'g TypeData<'g>,
    pub int32: &'g TypeData<'g>,
    pub int64: &'g TypeData<'g>,
    pub exception: &'g TypeData<'g>,
    pub argument_exception: &'g TypeData<'g>,
    pub argument_null_exception: &'g TypeData<'g>,
    pub invalid_operation_exception: &'g TypeData<'g>,
    pub debug: &'g TypeData<'g>,
    pub async_state_machine: &'g TypeData<'g>,
    pub task: &'g TypeData<'g>,
    pub generic_task: &'g TypeData<'g>,
    pub async_task_method_builder: &'g TypeData<'g>,
    pub generic_async_task_method_builder: &'g TypeData<'g>,
    pub async_void_method_builder: &'g TypeData<'g>,
}

impl<'g> SystemClasses<'g> {
    pub fn add_to_graph(type_graph: &TypeGraph<'g>) -> SystemClasses<'g> {
        let public = TypeAccessFlags::PUBLIC;
        let class = |namespace: &str, name: &str, base: Option<&'g TypeData<'g>>| {
            let ty = type_graph.add_type(TypeData::new(
                namespace,
                name,
                TypeKind::Class,
                public,
                None,
            ));
            ty.base_type.set(base);
            ty
        };

        let object = class("System", "Object", None);
        let value_type = class("System", "ValueType", Some(object));
        let string = class("System", "String", Some(object));
        let exception = class("System", "Exception", Some(object));
        let argument_exception = class("System", "ArgumentException", Some(exception));
        let argument_null_exception =
            class("System", "ArgumentNullException", Some(argument_exception));
        let invalid_operation_exception =
            class("System", "InvalidOperationException", Some(exception));
        let debug = class("System.Diagnostics", "Debug", Some(object));
        let task = class("System.Threading.Tasks", "Task", Some(object));

        let generic_task = type_graph.add_type(TypeData {
            generic_parameters: vec![String::from("TResult")],
            ..TypeData::new(
                "System.Threading.Tasks",
                "Task`1",
                TypeKind::Class,
                public,
                None,
            )
        });
        generic_task.base_type.set(Some(task));

        let value = |namespace: &str, name: &str, generic_parameters: &[&'static str]| {
            let ty = type_graph.add_type(TypeData {
                generic_parameters: generic_parameters.iter().map(|p| p.to_string()).collect(),
                ..TypeData::new(namespace, name, TypeKind::ValueType, public, None)
            });
            ty.base_type.set(Some(value_type));
            ty
        };
        let boolean = value("System", "Boolean", &[]);
        let int32 = value("System", "Int32", &[]);
        let int64 = value("System", "Int64", &[]);
        let async_task_method_builder = value(
            "System.Runtime.CompilerServices",
            "AsyncTaskMethodBuilder",
            &[],
        );
        let generic_async_task_method_builder = value(
            "System.Runtime.CompilerServices",
            "AsyncTaskMethodBuilder`1",
            &["TResult"],
        );
        let async_void_method_builder = value(
            "System.Runtime.CompilerServices",
            "AsyncVoidMethodBuilder",
            &[],
        );

        let async_state_machine = type_graph.add_type(TypeData::new(
            "System.Runtime.CompilerServices",
            "IAsyncStateMachine",
            TypeKind::Interface,
            public,
            None,
        ));

        SystemClasses {
            object,
            value_type,
            string,
            boolean,
            int32,
            int64,
            exception,
            argument_exception,
            argument_null_exception,
            invalid_operation_exception,
            debug,
            async_state_machine,
            task,
            generic_task,
            async_task_method_builder,
            generic_async_task_method_builder,
            async_void_method_builder,
        }
    }
}

pub struct SystemMembers<'g> {
    pub object_init: &'g MethodData<'g>,
    pub exception_init_message: &'g MethodData<'g>,

    /// `ArgumentNullException(string paramName)`
    pub argument_null_exception_init_param: &'g MethodData<'g>,

    /// `ArgumentNullException(string paramName, string message)`
    pub argument_null_exception_init_param_message: &'g MethodData<'g>,

    /// `InvalidOperationException(string message)`
    pub invalid_operation_exception_init_message: &'g MethodData<'g>,

    /// `Debug.Assert(bool condition, string message)`
    pub debug_assert: &'g MethodData<'g>,

    pub async_state_machine_move_next: &'g MethodData<'g>,
    pub async_task_method_builder_set_result: &'g MethodData<'g>,
    pub async_task_method_builder_set_exception: &'g MethodData<'g>,
    pub generic_async_task_method_builder_set_result: &'g MethodData<'g>,
    pub generic_async_task_method_builder_set_exception: &'g MethodData<'g>,
    pub async_void_method_builder_set_result: &'g MethodData<'g>,
    pub async_void_method_builder_set_exception: &'g MethodData<'g>,
}

impl<'g> SystemMembers<'g> {
    pub fn add_to_graph(
        type_graph: &TypeGraph<'g>,
        classes: &SystemClasses<'g>,
    ) -> SystemMembers<'g> {
        let string = || TypeSig::Named(classes.string);
        let method = |ty: &'g TypeData<'g>,
                      name: &str,
                      access_flags: MethodAccessFlags,
                      return_type: TypeSig<'g>,
                      parameters: Vec<(&'static str, TypeSig<'g>)>| {
            type_graph.add_method(MethodData::new(
                ty,
                name,
                access_flags,
                return_type,
                parameters
                    .into_iter()
                    .map(|(name, ty)| ParameterData::new(name, ty))
                    .collect(),
            ))
        };
        let constructor = MethodAccessFlags::PUBLIC | MethodAccessFlags::SPECIAL_NAME;
        let instance = MethodAccessFlags::PUBLIC;
        let exception = || TypeSig::Named(classes.exception);

        let object_init = method(classes.object, ".ctor", constructor, TypeSig::Void, vec![]);
        let exception_init_message = method(
            classes.exception,
            ".ctor",
            constructor,
            TypeSig::Void,
            vec![("message", string())],
        );
        let argument_null_exception_init_param = method(
            classes.argument_null_exception,
            ".ctor",
            constructor,
            TypeSig::Void,
            vec![("paramName", string())],
        );
        let argument_null_exception_init_param_message = method(
            classes.argument_null_exception,
            ".ctor",
            constructor,
            TypeSig::Void,
            vec![("paramName", string()), ("message", string())],
        );
        let invalid_operation_exception_init_message = method(
            classes.invalid_operation_exception,
            ".ctor",
            constructor,
            TypeSig::Void,
            vec![("message", string())],
        );
        let debug_assert = method(
            classes.debug,
            "Assert",
            MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
            TypeSig::Void,
            vec![
                ("condition", TypeSig::Named(classes.boolean)),
                ("message", string()),
            ],
        );
        let async_state_machine_move_next = method(
            classes.async_state_machine,
            "MoveNext",
            MethodAccessFlags::PUBLIC | MethodAccessFlags::VIRTUAL | MethodAccessFlags::ABSTRACT,
            TypeSig::Void,
            vec![],
        );

        let async_task_method_builder_set_result = method(
            classes.async_task_method_builder,
            "SetResult",
            instance,
            TypeSig::Void,
            vec![],
        );
        let async_task_method_builder_set_exception = method(
            classes.async_task_method_builder,
            "SetException",
            instance,
            TypeSig::Void,
            vec![("exception", exception())],
        );
        let generic_async_task_method_builder_set_result = method(
            classes.generic_async_task_method_builder,
            "SetResult",
            instance,
            TypeSig::Void,
            vec![(
                "result",
                TypeSig::GenericParam {
                    name: String::from("TResult"),
                    value_type: false,
                },
            )],
        );
        let generic_async_task_method_builder_set_exception = method(
            classes.generic_async_task_method_builder,
            "SetException",
            instance,
            TypeSig::Void,
            vec![("exception", exception())],
        );
        let async_void_method_builder_set_result = method(
            classes.async_void_method_builder,
            "SetResult",
            instance,
            TypeSig::Void,
            vec![],
        );
        let async_void_method_builder_set_exception = method(
            classes.async_void_method_builder,
            "SetException",
            instance,
            TypeSig::Void,
            vec![("exception", exception())],
        );

        SystemMembers {
            object_init,
            exception_init_message,
            argument_null_exception_init_param,
            argument_null_exception_init_param_message,
            invalid_operation_exception_init_message,
            debug_assert,
            async_state_machine_move_next,
            async_task_method_builder_set_result,
            async_task_method_builder_set_exception,
            generic_async_task_method_builder_set_result,
            generic_async_task_method_builder_set_exception,
            async_void_method_builder_set_result,
            async_void_method_builder_set_exception,
        }
    }
}
