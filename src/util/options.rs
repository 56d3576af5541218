use crate::util::constants::{BYTES_IN_KBYTE, BYTES_IN_MBYTE, BYTES_IN_PAGE};
use crate::util::conversions::raw_is_aligned;
use std::default::Default;
use strum_macros::{Display, EnumString};

/// Which summary structure an immune space keeps for its cross-space references.
/// The choice is made once, when the space is created.
#[derive(Copy, Clone, Debug, PartialEq, Eq, EnumString, Display)]
pub enum ModUnionTableKind {
    /// Cache the reference slots found on each cleared card.
    ReferenceCache,
    /// Cache only the cleared cards; rescan them every collection.
    CardCache,
}

fn always_valid<T>(_: &T) -> bool {
    true
}

fn page_aligned(v: &usize) -> bool {
    raw_is_aligned(*v, BYTES_IN_PAGE)
}

fn page_aligned_nonzero(v: &usize) -> bool {
    *v > 0 && page_aligned(v)
}

macro_rules! options {
    ($($name:ident: $type:ty[$validator:expr] = $default:expr),*,) => [
        options!($($name: $type[$validator] = $default),*);
    ];
    ($($name:ident: $type:ty[$validator:expr] = $default:expr),*) => [
        #[derive(Clone, Debug)]
        pub struct Options {
            $(pub $name: $type),*
        }
        impl Options {
            /// Set an option from its snake case name and a string value. Returns false if the
            /// value cannot be parsed or fails validation, in which case the option is unchanged.
            pub fn set_from_str(&mut self, s: &str, val: &str) -> bool {
                match s {
                    // Parse the given value from str (by env vars or by calling process()) to the right type
                    $(stringify!($name) => if let Ok(ref val) = val.parse::<$type>() {
                        // Validate
                        let validate_fn = $validator;
                        let is_valid = validate_fn(val);
                        if is_valid {
                            // Only set value if valid.
                            self.$name = val.clone();
                        } else {
                            warn!("Unable to set {}={:?}. Invalid value. Default value will be used.", s, val);
                        }
                        is_valid
                    } else {
                        warn!("Unable to set {}={:?}. Cant parse value. Default value will be used.", s, val);
                        false
                    })*
                    _ => {
                        warn!("Unknown option {}", s);
                        false
                    }
                }
            }
        }
        impl Options {
            /// Options with no environment overrides applied. Used where the process
            /// environment must not leak into the configuration, such as tests.
            pub fn without_env() -> Self {
                Options {
                    $($name: $default),*
                }
            }
        }
        impl Default for Options {
            fn default() -> Self {
                let mut options = Options::without_env();

                // If we have env vars that start with SSGC_ and match any option (such as SSGC_SEMI_SPACE_SIZE),
                // we set the option to its value (if it is a valid value). Otherwise, use the default value.
                const PREFIX: &str = "SSGC_";
                for (key, val) in std::env::vars() {
                    // strip the prefix, and get the lower case string
                    if let Some(rest_of_key) = key.strip_prefix(PREFIX) {
                        let lowercase: &str = &rest_of_key.to_lowercase();
                        match lowercase {
                            $(stringify!($name) => { options.set_from_str(lowercase, &val); },)*
                            _ => {}
                        }
                    }
                }
                options
            }
        }
    ]
}

options! {
    // Size of the image space. Zero means the heap has no image space.
    image_space_size:               usize             [page_aligned]          = BYTES_IN_MBYTE,
    // Footprint the non-moving space starts with.
    non_moving_space_initial_size:  usize             [page_aligned_nonzero]  = BYTES_IN_MBYTE,
    // The non-moving space does not grow past this until the growth limit is cleared.
    non_moving_space_growth_limit:  usize             [page_aligned_nonzero]  = 8 * BYTES_IN_MBYTE,
    // Reserved size of the non-moving space.
    non_moving_space_capacity:      usize             [page_aligned_nonzero]  = 16 * BYTES_IN_MBYTE,
    // Size of each of the two semi-spaces.
    semi_space_size:                usize             [page_aligned_nonzero]  = 8 * BYTES_IN_MBYTE,
    // Reserved size of the large object space.
    large_object_space_size:        usize             [page_aligned_nonzero]  = 16 * BYTES_IN_MBYTE,
    // Default allocations of at least this many bytes go to the large object space.
    large_object_threshold:         usize             [|v: &usize| *v > 0]    = 12 * BYTES_IN_KBYTE,
    // Number of entries the mark stack starts with.
    mark_stack_initial_capacity:    usize             [|v: &usize| *v > 0]    = 4096,
    // The mark stack may double up to this many entries. Overflowing it is fatal.
    mark_stack_growth_limit:        usize             [|v: &usize| *v > 0]    = 1 << 22,
    // Protect the from-space with PROT_NONE after it is cleared.
    protect_from_space:             bool              [always_valid]          = true,
    // Keep remembered sets for the non-moving space and allow from-space-only collections to use them.
    use_remembered_sets:            bool              [always_valid]          = true,
    // Verify every mod-union table after marking.
    verify_mod_union_tables:        bool              [always_valid]          = false,
    // Check that no to-space or remembered-set-space object refers to from-space after marking.
    verify_from_space_references:   bool              [always_valid]          = false,
    // Mod-union table strategy for the image space.
    image_mod_union_table:          ModUnionTableKind [always_valid]          = ModUnionTableKind::ReferenceCache,
    // Mod-union table strategy for the zygote space.
    zygote_mod_union_table:         ModUnionTableKind [always_valid]          = ModUnionTableKind::CardCache,
}

impl Options {
    /// Whether expensive verification runs, either requested by options or forced by the
    /// `extreme_assertions` feature.
    pub fn verify_mod_union_tables_enabled(&self) -> bool {
        self.verify_mod_union_tables || cfg!(feature = "extreme_assertions")
    }

    pub fn verify_from_space_references_enabled(&self) -> bool {
        self.verify_from_space_references || cfg!(feature = "extreme_assertions")
    }
}
