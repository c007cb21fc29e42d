use bitflags::bitflags;

bitflags! {
    /// Visibility and shape flags on types
    ///
    /// Visibility is a single choice in the container format, but is stored here as independent
    /// bits. A type with none of the visibility bits is internal to its assembly.
    pub struct TypeAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const NESTED_PUBLIC = 0x0002;
        const NESTED_PRIVATE = 0x0004;
        const NESTED_FAMILY = 0x0008;
        const NESTED_ASSEMBLY = 0x0010;
        const ABSTRACT = 0x0080;
        const SEALED = 0x0100;
    }
}

bitflags! {
    /// Visibility and dispatch flags on methods
    ///
    /// A method with none of the visibility bits is private to its type.
    pub struct MethodAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const FAMILY = 0x0004;
        const ASSEMBLY = 0x0008;
        const STATIC = 0x0010;
        const VIRTUAL = 0x0040;
        const ABSTRACT = 0x0400;
        const SPECIAL_NAME = 0x0800;
        const NEW_SLOT = 0x0100;
    }
}

bitflags! {
    /// Flags on fields
    pub struct FieldAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const STATIC = 0x0010;
    }
}

impl TypeAccessFlags {
    /// Parse a visibility keyword as written in the textual format
    pub fn from_keyword(keyword: &str) -> Option<TypeAccessFlags> {
        Some(match keyword {
            "public" => TypeAccessFlags::PUBLIC,
            "internal" | "private" => TypeAccessFlags::empty(),
            "nested-public" => TypeAccessFlags::NESTED_PUBLIC,
            "nested-private" => TypeAccessFlags::NESTED_PRIVATE,
            "nested-family" => TypeAccessFlags::NESTED_FAMILY,
            "nested-assembly" => TypeAccessFlags::NESTED_ASSEMBLY,
            "abstract" => TypeAccessFlags::ABSTRACT,
            "sealed" => TypeAccessFlags::SEALED,
            _ => return None,
        })
    }

    /// Keywords that reproduce these flags when parsed back
    pub fn keywords(&self) -> Vec<&'static str> {
        let mut keywords = vec![];
        for (flag, keyword) in [
            (TypeAccessFlags::PUBLIC, "public"),
            (TypeAccessFlags::NESTED_PUBLIC, "nested-public"),
            (TypeAccessFlags::NESTED_PRIVATE, "nested-private"),
            (TypeAccessFlags::NESTED_FAMILY, "nested-family"),
            (TypeAccessFlags::NESTED_ASSEMBLY, "nested-assembly"),
            (TypeAccessFlags::ABSTRACT, "abstract"),
            (TypeAccessFlags::SEALED, "sealed"),
        ] {
            if self.contains(flag) {
                keywords.push(keyword);
            }
        }
        keywords
    }
}

impl MethodAccessFlags {
    /// Parse a modifier keyword as written in the textual format
    pub fn from_keyword(keyword: &str) -> Option<MethodAccessFlags> {
        Some(match keyword {
            "public" => MethodAccessFlags::PUBLIC,
            "private" => MethodAccessFlags::PRIVATE,
            "family" | "protected" => MethodAccessFlags::FAMILY,
            "assembly" | "internal" => MethodAccessFlags::ASSEMBLY,
            "static" => MethodAccessFlags::STATIC,
            "virtual" => MethodAccessFlags::VIRTUAL,
            "abstract" => MethodAccessFlags::ABSTRACT,
            "specialname" => MethodAccessFlags::SPECIAL_NAME,
            "newslot" => MethodAccessFlags::NEW_SLOT,
            _ => return None,
        })
    }

    /// Keywords that reproduce these flags when parsed back
    pub fn keywords(&self) -> Vec<&'static str> {
        let mut keywords = vec![];
        for (flag, keyword) in [
            (MethodAccessFlags::PUBLIC, "public"),
            (MethodAccessFlags::PRIVATE, "private"),
            (MethodAccessFlags::FAMILY, "family"),
            (MethodAccessFlags::ASSEMBLY, "assembly"),
            (MethodAccessFlags::STATIC, "static"),
            (MethodAccessFlags::VIRTUAL, "virtual"),
            (MethodAccessFlags::ABSTRACT, "abstract"),
            (MethodAccessFlags::SPECIAL_NAME, "specialname"),
            (MethodAccessFlags::NEW_SLOT, "newslot"),
        ] {
            if self.contains(flag) {
                keywords.push(keyword);
            }
        }
        keywords
    }
}
