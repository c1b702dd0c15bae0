use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, parse_macro_input};

/// `PageNotes` -> `page_notes`
fn field_name(variant: &syn::Ident) -> syn::Ident {
    let name = variant.to_string();
    let mut snake = String::with_capacity(name.len() + 4);
    for ch in name.chars() {
        if ch.is_uppercase() && !snake.is_empty() {
            snake.push('_');
        }
        snake.push(ch.to_ascii_lowercase());
    }
    syn::Ident::new(&snake, variant.span())
}

/// Derives a `{Enum}Map<T>` struct holding exactly one `T` per variant,
/// plus `{Enum}::ALL` listing the variants in declaration order.
#[proc_macro_derive(EnuMap)]
pub fn derive_enumap(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    let enum_name = &input.ident;
    let vis = &input.vis;
    let map_name = syn::Ident::new(&format!("{enum_name}Map"), enum_name.span());

    let Data::Enum(data_enum) = &input.data else {
        return syn::Error::new_spanned(&input.ident, "EnuMap can only be derived for enums")
            .to_compile_error()
            .into();
    };

    if let Some(variant) = data_enum
        .variants
        .iter()
        .find(|variant| !matches!(variant.fields, Fields::Unit))
    {
        return syn::Error::new_spanned(variant, "EnuMap variants cannot carry fields")
            .to_compile_error()
            .into();
    }
    let variant_names: Vec<&syn::Ident> = data_enum.variants.iter().map(|v| &v.ident).collect();
    let field_names: Vec<syn::Ident> = variant_names.iter().map(|v| field_name(v)).collect();
    let variant_count = variant_names.len();

    let expanded = quote! {
        impl #enum_name {
            pub const ALL: [#enum_name; #variant_count] = [#(#enum_name::#variant_names),*];
        }

        #[derive(Clone, Debug, PartialEq, Default)]
        #vis struct #map_name<T> {
            #(pub #field_names: T),*
        }

        impl<T> #map_name<T> {
            pub fn from_fn(mut f: impl FnMut(#enum_name) -> T) -> Self {
                Self {
                    #(#field_names: f(#enum_name::#variant_names)),*
                }
            }

            pub fn get(&self, key: &#enum_name) -> &T {
                match key {
                    #(#enum_name::#variant_names => &self.#field_names),*
                }
            }

            pub fn get_mut(&mut self, key: &#enum_name) -> &mut T {
                match key {
                    #(#enum_name::#variant_names => &mut self.#field_names),*
                }
            }

            pub fn set(&mut self, key: &#enum_name, value: T) -> T {
                ::std::mem::replace(self.get_mut(key), value)
            }

            pub fn iter(&self) -> impl Iterator<Item = (#enum_name, &T)> {
                #enum_name::ALL.into_iter().map(move |key| (key, self.get(&key)))
            }

            pub fn map<U>(&self, mut f: impl FnMut(#enum_name, &T) -> U) -> #map_name<U> {
                #map_name {
                    #(#field_names: f(#enum_name::#variant_names, &self.#field_names)),*
                }
            }
        }
    };

    TokenStream::from(expanded)
}
