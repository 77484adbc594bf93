//! Derive macros for the slotsync engine
//!
//! This crate provides procedural macros to reduce boilerplate when building
//! reducers over command/event action enums.
//!
//! # Available Macros
//!
//! - `#[derive(Action)]` - Generates helpers for action enums (commands/events)
//!
//! # Example
//!
//! ```ignore
//! use slotsync_macros::Action;
//!
//! #[derive(Action, Clone, Debug)]
//! enum SyncAction {
//!     #[command]
//!     Reserve { slot_id: SlotId },
//!
//!     #[event]
//!     BookingConfirmed { booking: Booking },
//! }
//!
//! // Generated methods:
//! assert!(SyncAction::Reserve { slot_id }.is_command());
//! assert_eq!(SyncAction::BookingConfirmed { booking }.kind(), "bookingConfirmed");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Attribute, Data, DeriveInput, Fields};

/// Derive macro for Action enums
///
/// Generates helper methods for action enums:
/// - `is_command()` - Returns true if this variant is a command
/// - `is_event()` - Returns true if this variant is an event
/// - `kind()` - Returns the wire kind for events (lower-camel-case variant name)
///
/// # Attributes
///
/// - `#[command]` - Mark a variant as a command (local intent, never received
///   from the server)
/// - `#[event]` - Mark a variant as an event (a fact reported by the server
///   or produced by effect feedback)
///
/// The `kind()` string matches the `kind` field of inbound wire frames, so a
/// `SlotAdded` event variant reports `"slotAdded"`. Commands report
/// `"command"`.
///
/// # Panics
///
/// This macro will produce a compile error (not a runtime panic) if:
/// - Applied to a non-enum type
/// - A variant has both `#[command]` and `#[event]` attributes
#[proc_macro_derive(Action, attributes(command, event))]
#[allow(clippy::expect_used)] // Proc macro panics become compile errors, not runtime panics
pub fn derive_action(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;

    let Data::Enum(data_enum) = &input.data else {
        return syn::Error::new_spanned(input, "#[derive(Action)] can only be used on enums")
            .to_compile_error()
            .into();
    };

    let mut command_variants = Vec::new();
    let mut event_variants = Vec::new();

    for variant in &data_enum.variants {
        let variant_name = &variant.ident;
        let is_command = has_attribute(&variant.attrs, "command");
        let is_event = has_attribute(&variant.attrs, "event");

        if is_command && is_event {
            return syn::Error::new_spanned(
                variant,
                "Variant cannot be both #[command] and #[event]",
            )
            .to_compile_error()
            .into();
        }

        if is_command {
            command_variants.push(variant_name);
        }

        if is_event {
            event_variants.push(variant_name);
        }
    }

    let variant_map: std::collections::HashMap<_, _> = data_enum
        .variants
        .iter()
        .map(|v| (&v.ident, &v.fields))
        .collect();

    let is_command_arms = command_variants.iter().map(|variant| {
        let fields = variant_map.get(variant).expect("variant must exist in map");
        variant_pattern(variant, fields, quote! { true })
    });

    let is_event_arms = event_variants.iter().map(|variant| {
        let fields = variant_map.get(variant).expect("variant must exist in map");
        variant_pattern(variant, fields, quote! { true })
    });

    let kind_arms = event_variants.iter().map(|variant| {
        let kind = lower_camel_case(&variant.to_string());
        let fields = variant_map.get(variant).expect("variant must exist in map");
        variant_pattern(variant, fields, quote! { #kind })
    });

    let expanded = quote! {
        impl #name {
            /// Returns true if this action is a command
            #[must_use]
            pub const fn is_command(&self) -> bool {
                match self {
                    #(#is_command_arms)*
                    _ => false,
                }
            }

            /// Returns true if this action is an event
            #[must_use]
            pub const fn is_event(&self) -> bool {
                match self {
                    #(#is_event_arms)*
                    _ => false,
                }
            }

            /// Returns the wire kind for event variants
            ///
            /// Commands report `"command"`; they never appear on the inbound
            /// wire.
            #[must_use]
            pub const fn kind(&self) -> &'static str {
                match self {
                    #(#kind_arms)*
                    _ => "command",
                }
            }
        }
    };

    TokenStream::from(expanded)
}

/// Build a match arm `Self::Variant { .. } => <body>,` for any field shape.
fn variant_pattern(
    variant: &syn::Ident,
    fields: &Fields,
    body: proc_macro2::TokenStream,
) -> proc_macro2::TokenStream {
    match fields {
        Fields::Named(_) => quote! { Self::#variant { .. } => #body, },
        Fields::Unnamed(_) => quote! { Self::#variant(..) => #body, },
        Fields::Unit => quote! { Self::#variant => #body, },
    }
}

/// Convert a PascalCase variant name to the lowerCamelCase wire kind.
fn lower_camel_case(pascal: &str) -> String {
    let mut chars = pascal.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Helper function to check if an attribute list contains a specific attribute
fn has_attribute(attrs: &[Attribute], name: &str) -> bool {
    attrs.iter().any(|attr| attr.path().is_ident(name))
}
