use proc_macro2::TokenStream;
use quote::quote;
use syn::{
    DeriveInput, Field, Index, LitStr, Path, Token, WherePredicate, punctuated::Punctuated,
    spanned::Spanned,
};

/// Checks a field for `#[push_constants(skip)]`.
fn is_skipped(field: &Field) -> syn::Result<bool> {
    let mut skip = false;
    for attr in &field.attrs {
        if !attr.path().is_ident("push_constants") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("skip") {
                skip = true;
                Ok(())
            } else {
                Err(meta.error("unexpected field attribute; supported is `skip`"))
            }
        })?;
    }
    Ok(skip)
}

pub fn derive_push_constants(input: DeriveInput) -> TokenStream {
    // retrieve struct field information
    let fields = match &input.data {
        syn::Data::Struct(data_struct) => &data_struct.fields,
        _ => {
            return syn::Error::new(input.span(), "`PushConstants` can only be derived for structs")
                .to_compile_error();
        }
    };

    // field access expressions and their types, in declaration order
    let mut accesses = vec![];
    let mut types = vec![];
    for (index, field) in fields.iter().enumerate() {
        match is_skipped(field) {
            Ok(true) => continue,
            Ok(false) => {}
            Err(err) => return err.to_compile_error(),
        }
        let access = match &field.ident {
            Some(ident) => quote! { self.#ident },
            None => {
                let index = Index::from(index);
                quote! { self.#index }
            }
        };
        accesses.push(access);
        types.push(&field.ty);
    }

    let name = input.ident;

    // parse push_constants attributes
    let mut crate_name = None;
    let mut user_bounds = Punctuated::<WherePredicate, Token![,]>::new();
    for attr in &input.attrs {
        if !attr.path().is_ident("push_constants") {
            continue;
        }

        let result = attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("crate") {
                let value = meta.value()?;
                let s: LitStr = value.parse()?;
                crate_name = Some(s.parse::<Path>()?);
                Ok(())
            } else if meta.path.is_ident("bound") {
                let value = meta.value()?;
                let s: LitStr = value.parse()?;
                let predicates =
                    s.parse_with(Punctuated::<WherePredicate, Token![,]>::parse_terminated)?;
                user_bounds.extend(predicates);
                Ok(())
            } else {
                Err(meta.error("unexpected attribute; supported are `crate` and `bound`"))
            }
        });

        if let Err(err) = result {
            return err.to_compile_error();
        }
    }
    // determine the base path for trait implementation
    let base_path = match crate_name {
        Some(path) => quote!(#path::launch::push),
        None => quote!(::vklaunch::launch::push),
    };

    // handle struct generics
    let generics = &input.generics;
    let (impl_generics, ty_generics, _) = generics.split_for_impl();

    // prepare where clause
    let mut generics = generics.clone();
    let where_clause = generics.make_where_clause();
    where_clause.predicates.extend(user_bounds);

    quote! {
        impl #impl_generics #base_path::PushConstants for #name #ty_generics #where_clause {
            fn push_constants(&self) -> ::std::vec::Vec<#base_path::PushConstant> {
                ::std::vec![#(
                    <#base_path::PushConstant as ::core::convert::From<#types>>::from(#accesses)
                ),*]
            }
        }
    }
}
