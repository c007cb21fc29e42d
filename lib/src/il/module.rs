use super::type_graph::{MethodData, TypeData};
use super::FullName;

/// Types loaded from one module, in declaration order (nested types follow their declaring type)
///
/// The types themselves live in the type graph; the module only records which of them it
/// declared, so that the system library and other modules sharing the graph are left alone.
pub struct Module<'g> {
    pub types: Vec<&'g TypeData<'g>>,
}

impl<'g> Module<'g> {
    pub fn find_type(&self, full_name: &str) -> Option<&'g TypeData<'g>> {
        self.types
            .iter()
            .copied()
            .find(|ty| ty.full_name() == full_name)
    }

    /// First method with the given name on the given type
    pub fn find_method(
        &self,
        type_full_name: &str,
        method_name: &str,
    ) -> Option<&'g MethodData<'g>> {
        self.find_type(type_full_name)?
            .methods
            .iter()
            .find(|method| method.name == method_name)
    }

    /// Every method declared in the module
    pub fn methods(&self) -> impl Iterator<Item = &'g MethodData<'g>> + '_ {
        self.types.iter().copied().flat_map(|ty| ty.methods.iter())
    }
}
