//! # Graphcode Derive Macros
//!
//! This crate provides the procedural macros for `graphcode`. It implements
//! `Encode`, `Decode` and `Class` for structs, writing named fields as keyed
//! entries and tuple fields as positional entries.
//!
//! Compatible with `syn 2.0`.
//!
//! ## Attributes
//!
//! On the struct:
//! - `#[graphcode(class = "Name")]` tags instances with a class name.
//! - `#[graphcode(version = 2)]` sets the class layout version.
//! - `#[graphcode(hashable)]` gives instances hash-equality identity
//!   (requires `Hash + Eq + Clone`).
//!
//! On a field:
//! - `#[graphcode(id)]` uses the field as the instance's declared identity.
//! - `#[graphcode(conditional)]` writes the field as a conditional reference.
//! - `#[graphcode(rename = "key")]` stores the field under another key.
//! - `#[graphcode(default)]` falls back to `Default` when the key is missing.
//! - `#[graphcode(skip)]` never writes the field and decodes it as `Default`.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{
    Attribute, Data, DeriveInput, Fields, GenericParam, Generics, Index, LitInt, LitStr, Member,
    parse_macro_input, parse_quote,
};

/// Derives `graphcode::Encode`.
#[proc_macro_derive(Encode, attributes(graphcode))]
pub fn derive_encode(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand(&input, generate_encode)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}

/// Derives `graphcode::Decode`, and `graphcode::Class` when a class name is given.
#[proc_macro_derive(Decode, attributes(graphcode))]
pub fn derive_decode(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand(&input, generate_decode)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}

fn expand(
    input: &DeriveInput,
    generate: fn(&DeriveInput, &Model) -> TokenStream2,
) -> syn::Result<TokenStream2> {
    let model = Model::parse(input)?;
    Ok(generate(input, &model))
}

// --- Internal Data Structures ---

struct Model {
    class: Option<String>,
    version: u32,
    hashable: bool,
    shape: Shape,
    fields: Vec<FieldModel>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Shape {
    Named,
    Tuple,
    Unit,
}

struct FieldModel {
    member: Member,
    key: String,
    id: bool,
    conditional: bool,
    default: bool,
    skip: bool,
}

impl Model {
    fn parse(input: &DeriveInput) -> syn::Result<Self> {
        let Data::Struct(data) = &input.data else {
            return Err(syn::Error::new(
                input.ident.span(),
                "graphcode derives only support structs",
            ));
        };
        let mut model = Self {
            class: None,
            version: 0,
            hashable: false,
            shape: match data.fields {
                Fields::Named(_) => Shape::Named,
                Fields::Unnamed(_) => Shape::Tuple,
                Fields::Unit => Shape::Unit,
            },
            fields: Vec::new(),
        };
        model.parse_struct_attributes(&input.attrs)?;

        for (index, field) in data.fields.iter().enumerate() {
            let (member, key) = match &field.ident {
                Some(ident) => (Member::Named(ident.clone()), ident.to_string()),
                None => (Member::Unnamed(Index::from(index)), index.to_string()),
            };
            let mut parsed = FieldModel {
                member,
                key,
                id: false,
                conditional: false,
                default: false,
                skip: false,
            };
            parse_field_attributes(&field.attrs, &mut parsed)?;
            if parsed.id && parsed.skip {
                return Err(syn::Error::new_spanned(field, "an `id` field cannot be skipped"));
            }
            model.fields.push(parsed);
        }

        if model.fields.iter().filter(|f| f.id).count() > 1 {
            return Err(syn::Error::new(
                input.ident.span(),
                "at most one field can be marked `id`",
            ));
        }
        if model.version != 0 && model.class.is_none() {
            return Err(syn::Error::new(
                input.ident.span(),
                "`version` requires a `class` name",
            ));
        }
        Ok(model)
    }

    fn parse_struct_attributes(&mut self, attrs: &[Attribute]) -> syn::Result<()> {
        for attr in attrs {
            if !attr.path().is_ident("graphcode") {
                continue;
            }
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("class") {
                    let s: LitStr = meta.value()?.parse()?;
                    if s.value().is_empty() {
                        return Err(meta.error("class name cannot be empty"));
                    }
                    self.class = Some(s.value());
                    return Ok(());
                }
                if meta.path.is_ident("version") {
                    let n: LitInt = meta.value()?.parse()?;
                    self.version = n.base10_parse()?;
                    return Ok(());
                }
                if meta.path.is_ident("hashable") {
                    self.hashable = true;
                    return Ok(());
                }
                Err(meta.error(
                    "Unknown graphcode struct attribute. Supported: class, version, hashable",
                ))
            })?;
        }
        Ok(())
    }

    fn has_identity(&self) -> bool {
        self.hashable || self.fields.iter().any(|f| f.id)
    }

    fn class_info(&self) -> Option<TokenStream2> {
        let name = self.class.as_ref()?;
        let version = self.version;
        Some(quote! {
            ::graphcode::ClassInfo {
                name: #name,
                version: #version,
                qualified_name: ::core::any::type_name::<Self>(),
            }
        })
    }
}

fn parse_field_attributes(attrs: &[Attribute], field: &mut FieldModel) -> syn::Result<()> {
    for attr in attrs {
        if !attr.path().is_ident("graphcode") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("id") {
                field.id = true;
                return Ok(());
            }
            if meta.path.is_ident("conditional") {
                field.conditional = true;
                return Ok(());
            }
            if meta.path.is_ident("default") {
                field.default = true;
                return Ok(());
            }
            if meta.path.is_ident("skip") {
                field.skip = true;
                return Ok(());
            }
            if meta.path.is_ident("rename") {
                let s: LitStr = meta.value()?.parse()?;
                field.key = s.value();
                return Ok(());
            }
            Err(meta.error(
                "Unknown graphcode field attribute. Supported: id, conditional, rename, default, skip",
            ))
        })?;
    }
    Ok(())
}

/// Adds `bound` to every type parameter.
fn bounded(generics: &Generics, bound: TokenStream2) -> Generics {
    let mut generics = generics.clone();
    for param in &mut generics.params {
        if let GenericParam::Type(ty) = param {
            ty.bounds.push(parse_quote!(#bound));
        }
    }
    generics
}

// --- Generator: Encode ---

fn generate_encode(input: &DeriveInput, model: &Model) -> TokenStream2 {
    let name = &input.ident;
    let generics = if model.has_identity() {
        bounded(&input.generics, quote!(::graphcode::Encode + 'static))
    } else {
        bounded(&input.generics, quote!(::graphcode::Encode))
    };
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let writes = model.fields.iter().filter(|f| !f.skip).map(|f| {
        let member = &f.member;
        let key = &f.key;
        match (model.shape, f.conditional) {
            (Shape::Named, false) => quote! { encoder.encode_key(#key, &self.#member)?; },
            (Shape::Named, true) => {
                quote! { encoder.encode_key_conditional(#key, &self.#member)?; }
            }
            (_, false) => quote! { encoder.encode_next(&self.#member)?; },
            (_, true) => quote! { encoder.encode_next_conditional(&self.#member)?; },
        }
    });

    let identity = model.has_identity().then(|| {
        let declared = model.fields.iter().find(|f| f.id).map(|f| {
            let member = &f.member;
            quote! {
                ::graphcode::IdentitySource::Declared => ::core::option::Option::Some(
                    ::graphcode::Identity::declared::<Self, _>(::core::clone::Clone::clone(&self.#member)),
                ),
            }
        });
        let hashed = model.hashable.then(|| {
            quote! {
                ::graphcode::IdentitySource::Hashable => ::core::option::Option::Some(
                    ::graphcode::Identity::hashed(self),
                ),
            }
        });
        quote! {
            fn identity(
                &self,
                source: ::graphcode::IdentitySource,
            ) -> ::core::option::Option<::graphcode::Identity> {
                match source {
                    #declared
                    #hashed
                    _ => ::core::option::Option::None,
                }
            }
        }
    });

    let class = model.class_info().map(|info| {
        quote! {
            fn class(&self) -> ::core::option::Option<::graphcode::ClassInfo> {
                ::core::option::Option::Some(#info)
            }
        }
    });

    quote! {
        impl #impl_generics ::graphcode::Encode for #name #ty_generics #where_clause {
            #[allow(unused_variables)]
            fn encode(&self, encoder: &mut ::graphcode::Encoder) -> ::graphcode::Result<()> {
                #(#writes)*
                ::core::result::Result::Ok(())
            }

            #identity
            #class
        }
    }
}

// --- Generator: Decode ---

fn generate_decode(input: &DeriveInput, model: &Model) -> TokenStream2 {
    let name = &input.ident;
    let generics = bounded(&input.generics, quote!(::graphcode::Decode));
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let reads = model.fields.iter().map(|f| {
        let key = &f.key;
        let read = if f.skip {
            quote! { ::core::default::Default::default() }
        } else if model.shape == Shape::Named {
            if f.default {
                quote! {
                    if decoder.contains_key(#key) {
                        decoder.decode_key(#key)?
                    } else {
                        ::core::default::Default::default()
                    }
                }
            } else {
                quote! { decoder.decode_key(#key)? }
            }
        } else if f.default {
            quote! {
                if decoder.has_next() {
                    decoder.decode_next()?
                } else {
                    ::core::default::Default::default()
                }
            }
        } else {
            quote! { decoder.decode_next()? }
        };
        match &f.member {
            Member::Named(ident) => quote! { #ident: #read },
            Member::Unnamed(_) => read,
        }
    });

    let construct = match model.shape {
        Shape::Named => quote! { Self { #(#reads),* } },
        Shape::Tuple => {
            // Bind in order first so positional reads follow the stream.
            let bindings: Vec<_> = (0..model.fields.len())
                .map(|i| format_ident!("__field{}", i))
                .collect();
            quote! {
                {
                    #(let #bindings = #reads;)*
                    Self(#(#bindings),*)
                }
            }
        }
        Shape::Unit => quote! { Self },
    };

    let share = model.has_identity().then(|| {
        quote! {
            fn share(&self) -> ::core::option::Option<Self> {
                ::core::option::Option::Some(::core::clone::Clone::clone(self))
            }
        }
    });

    let class_fn = model.class.as_ref().map(|_| {
        quote! {
            fn class() -> ::core::option::Option<::graphcode::ClassInfo> {
                ::core::option::Option::Some(::graphcode::ClassInfo::of::<Self>())
            }
        }
    });

    let class_impl = model.class.as_ref().map(|class| {
        let version = model.version;
        quote! {
            impl #impl_generics ::graphcode::Class for #name #ty_generics #where_clause {
                const NAME: &'static str = #class;
                const VERSION: u32 = #version;
            }
        }
    });

    quote! {
        impl #impl_generics ::graphcode::Decode for #name #ty_generics #where_clause {
            #[allow(unused_variables)]
            fn decode(decoder: &mut ::graphcode::Decoder<'_>) -> ::graphcode::Result<Self> {
                ::core::result::Result::Ok(#construct)
            }

            #share
            #class_fn
        }

        #class_impl
    }
}
