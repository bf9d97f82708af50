//! Test utilities for property-based testing
//!
//! This module provides generators and helpers for proptest.

#[cfg(test)]
pub mod generators {
    use proptest::prelude::*;

    use crate::core::provider::Region;

    /// Generate a C identifier usable as a macro or symbol name
    pub fn c_identifier() -> impl Strategy<Value = String> {
        "[A-Za-z_][A-Za-z0-9_]{0,24}"
    }

    /// Generate a macro definition, with or without a value
    pub fn macro_definition() -> impl Strategy<Value = String> {
        (c_identifier(), prop::option::of("[0-9]{1,6}")).prop_map(|(name, value)| match value {
            Some(value) => format!("{name}={value}"),
            None => name,
        })
    }

    /// Generate a relative header path as it appears in a dependency file
    pub fn header_path() -> impl Strategy<Value = String> {
        prop::collection::vec("[a-z][a-z0-9_]{0,8}", 1..4)
            .prop_map(|parts| format!("{}.h", parts.join("/")))
    }

    /// Generate a layout of non-overlapping regions in ascending order
    ///
    /// Each region is `(start, size)`; gaps between regions are at least
    /// one byte.
    pub fn region_layout() -> impl Strategy<Value = Vec<(u32, u32)>> {
        prop::collection::vec((1u32..0x200, 1u32..0x200), 1..6).prop_map(|spans| {
            let mut next = 0u32;
            spans
                .into_iter()
                .map(|(gap, size)| {
                    let start = next + gap;
                    next = start + size;
                    (start, size)
                })
                .collect()
        })
    }

    /// Turn a layout into inactive regions named `r0`, `r1`, ...
    pub fn regions_from_layout(layout: &[(u32, u32)]) -> Vec<Region> {
        layout
            .iter()
            .enumerate()
            .map(|(i, (start, size))| Region {
                name: format!("r{i}"),
                start: *start,
                size: *size,
                path: None,
                active: false,
                updatable: false,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::generators::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn test_c_identifier_generator(name in c_identifier()) {
            prop_assert!(!name.is_empty());
            prop_assert!(!name.starts_with(|c: char| c.is_ascii_digit()));
        }

        #[test]
        fn test_macro_definition_generator(def in macro_definition()) {
            prop_assert!(def.split('=').count() <= 2);
        }

        #[test]
        fn test_region_layout_generator(layout in region_layout()) {
            for pair in layout.windows(2) {
                prop_assert!(pair[0].0 + pair[0].1 < pair[1].0);
            }
        }
    }
}
