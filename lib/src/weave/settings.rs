use super::Error;
use crate::il::type_graph::MethodData;
use bitflags::bitflags;

bitflags! {
    /// Which slots get null guards
    ///
    /// A `NullGuard(...)` attribute on a type replaces these flags for the methods of that type.
    pub struct ValidationFlags: u8 {
        const NONE = 0;

        /// Entry guards on reference-type parameters
        const ARGUMENTS = 0x01;

        /// Guards on reference-type return values
        const RETURN_VALUES = 0x02;

        /// Guards on `out` parameters at every return point (also needs `ARGUMENTS`)
        const OUT_VALUES = 0x04;

        /// Also process methods that aren't visible outside the assembly
        const NON_PUBLIC = 0x08;

        const ALL_PUBLIC = Self::ARGUMENTS.bits | Self::RETURN_VALUES.bits | Self::OUT_VALUES.bits;
        const ALL = Self::ALL_PUBLIC.bits | Self::NON_PUBLIC.bits;
    }
}

impl ValidationFlags {
    /// Parse flag names separated by `|` or `,` (eg. `Arguments|ReturnValues`)
    ///
    /// Names are matched case insensitively, and surrounding whitespace is ignored.
    pub fn parse(flags: &str) -> Result<ValidationFlags, Error> {
        let mut parsed = ValidationFlags::NONE;
        for name in flags.split(|c| c == '|' || c == ',') {
            // Attribute arguments may spell out the enum type (`ValidationFlags.Arguments`)
            let name = name.trim();
            let name = name.rsplit('.').next().unwrap_or(name);
            parsed |= match name.to_ascii_lowercase().as_str() {
                "none" => ValidationFlags::NONE,
                "arguments" => ValidationFlags::ARGUMENTS,
                "returnvalues" => ValidationFlags::RETURN_VALUES,
                "outvalues" => ValidationFlags::OUT_VALUES,
                "nonpublic" => ValidationFlags::NON_PUBLIC,
                "allpublic" => ValidationFlags::ALL_PUBLIC,
                "all" => ValidationFlags::ALL,
                _ => return Err(Error::InvalidFlags(flags.to_owned())),
            };
        }
        Ok(parsed)
    }
}

/// Decides which methods are generated code and should be left alone
pub trait GeneratedCodeFilter: Send + Sync {
    fn is_generated_code(&self, method: &MethodData<'_>) -> bool;
}

/// Generated code is whatever carries `CompilerGenerated` or `GeneratedCode` (directly or on an
/// enclosing type)
pub struct AttributeFilter;

impl GeneratedCodeFilter for AttributeFilter {
    fn is_generated_code(&self, method: &MethodData<'_>) -> bool {
        method.is_generated_code()
    }
}

pub struct Settings {
    /// Flags for types without a `NullGuard` attribute
    pub validation_flags: ValidationFlags,

    /// Only guard slots explicitly marked `NotNull`
    pub explicit_mode: bool,

    /// Also emit `Debug.Assert` calls ahead of every guard
    pub debug_build: bool,

    /// Methods for which this returns `true` are never rewritten
    pub generated_code: Box<dyn GeneratedCodeFilter>,
}

impl Settings {
    pub fn new() -> Settings {
        Settings {
            validation_flags: ValidationFlags::ALL_PUBLIC,
            explicit_mode: false,
            debug_build: false,
            generated_code: Box::new(AttributeFilter),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_flag_lists() {
        assert_eq!(
            ValidationFlags::parse("Arguments|ReturnValues").unwrap(),
            ValidationFlags::ARGUMENTS | ValidationFlags::RETURN_VALUES
        );
        assert_eq!(
            ValidationFlags::parse("outvalues, NonPublic").unwrap(),
            ValidationFlags::OUT_VALUES | ValidationFlags::NON_PUBLIC
        );
        assert_eq!(
            ValidationFlags::parse("ValidationFlags.AllPublic").unwrap(),
            ValidationFlags::ALL_PUBLIC
        );
        assert_eq!(ValidationFlags::parse("None").unwrap(), ValidationFlags::NONE);
        assert_eq!(ValidationFlags::parse("All").unwrap(), ValidationFlags::ALL);
        assert!(matches!(
            ValidationFlags::parse("Arguments|Everything"),
            Err(Error::InvalidFlags(_))
        ));
    }

    #[test]
    fn settings_are_shareable_between_threads() {
        fn assert_shareable<T: Send + Sync>(_: &T) {}

        let settings = Settings::new();
        assert_shareable(&settings);
        std::thread::scope(|scope| {
            scope.spawn(|| assert!(settings.validation_flags.contains(ValidationFlags::ARGUMENTS)));
        });
    }
}
