use super::{Error, Settings, ValidationFlags};
use crate::il::type_graph::{MethodData, ParameterData};
use crate::il::{find_attribute, has_attribute, CustomAttribute, TypeSig};

/// Which slots of one method must not be null
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct MethodPolicy {
    /// Flags in effect for the method (a type-level `NullGuard` replaces the process default)
    pub flags: ValidationFlags,

    /// Only slots marked `NotNull` are guarded
    pub explicit_mode: bool,
}

impl MethodPolicy {
    /// Resolve the flags in effect for a method
    ///
    /// Only the declaring type's own `NullGuard` attribute is considered. Its flags are used as is,
    /// never merged with the process default.
    pub fn resolve(method: &MethodData<'_>, settings: &Settings) -> Result<MethodPolicy, Error> {
        let attribute = find_attribute(
            &method.declaring_type.attributes,
            CustomAttribute::NULL_GUARD,
        );
        let flags = match attribute {
            Some(attribute) if !attribute.arguments.is_empty() => {
                ValidationFlags::parse(&attribute.arguments.join("|"))?
            }
            _ => settings.validation_flags,
        };
        Ok(MethodPolicy {
            flags,
            explicit_mode: settings.explicit_mode,
        })
    }

    pub fn has(&self, flags: ValidationFlags) -> bool {
        self.flags.contains(flags)
    }

    /// Is the method processed at all?
    ///
    /// Without `NON_PUBLIC`, only public methods of publicly visible types are, along with
    /// overrides and implementations of public members.
    pub fn is_visible(&self, method: &MethodData<'_>) -> bool {
        self.has(ValidationFlags::NON_PUBLIC)
            || (method.is_public() && method.declaring_type.is_public_or_nested_public())
            || method.is_override_or_implementation_of_public_member()
    }

    /// Do these attributes let the slot hold null?
    ///
    /// Implicit mode: yes when marked `AllowNull` or `CanBeNull`. Explicit mode: yes unless
    /// marked `NotNull`.
    pub fn allows_null(&self, attributes: &[CustomAttribute]) -> bool {
        if self.explicit_mode {
            !has_attribute(attributes, CustomAttribute::NOT_NULL)
        } else {
            has_attribute(attributes, CustomAttribute::ALLOW_NULL)
                || has_attribute(attributes, CustomAttribute::CAN_BE_NULL)
        }
    }

    /// Does the parameter get an entry guard?
    ///
    /// `out` parameters are checked on the way out instead, and optional parameters defaulting to
    /// null obviously accept null.
    pub fn must_guard_parameter(&self, parameter: &ParameterData<'_>) -> bool {
        !self.allows_null(&parameter.attributes)
            && !parameter.has_null_default
            && !parameter.is_out
            && parameter.ty.is_ref_type()
    }

    /// Does a value of this type returned by the method get a guard?
    ///
    /// The type is passed separately since asynchronous methods return a task wrapping the value
    /// actually checked. Allow-null markers may be on the return value or on the method itself.
    pub fn must_guard_return(&self, method: &MethodData<'_>, value_type: &TypeSig<'_>) -> bool {
        self.has(ValidationFlags::RETURN_VALUES)
            && !value_type.is_void()
            && value_type.is_ref_type()
            && !self.allows_null_return(method)
    }

    fn allows_null_return(&self, method: &MethodData<'_>) -> bool {
        if self.explicit_mode {
            self.allows_null(&method.return_attributes) && self.allows_null(&method.attributes)
        } else {
            self.allows_null(&method.return_attributes) || self.allows_null(&method.attributes)
        }
    }

    /// Does the `out` parameter get checked at every return point?
    pub fn must_guard_out_parameter(&self, parameter: &ParameterData<'_>) -> bool {
        self.has(ValidationFlags::ARGUMENTS | ValidationFlags::OUT_VALUES)
            && parameter.is_out
            && parameter.ty.is_ref_type()
            && !self.allows_null(&parameter.attributes)
    }
}
