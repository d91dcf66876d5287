use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::{format_ident, quote};
use syn::ext::IdentExt;
use syn::{parse_macro_input, spanned::Spanned, Attribute, Data, DeriveInput, Fields, Ident, LitStr, Type};

/// Implements `closure_forest::ForestModel` for a SeaORM `Model`.
///
/// ```ignore
/// #[derive(Clone, Debug, PartialEq, DeriveEntityModel, ForestModel)]
/// #[sea_orm(table_name = "users")]
/// #[forest(key_field = "email", hierarchy_name = "ReferralHierarchy")]
/// pub struct Model { /* ... */ }
/// ```
#[proc_macro_derive(ForestModel, attributes(forest))]
pub fn derive_forest_model(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match impl_forest_model(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

#[derive(Default)]
struct Options {
    id_field: Option<String>,
    id_type: Option<Type>,
    key_field: Option<String>,
    entity_name: Option<String>,
    hierarchy_name: Option<String>,
    hierarchy_table: Option<String>,
    ancestor_column: Option<String>,
    descendant_column: Option<String>,
    generations_column: Option<String>,
    orphan_policy: Option<LitStr>,
    order: Option<LitStr>,
    order_column: Option<String>,
    advisory_lock: Option<LitStr>,
}

fn impl_forest_model(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let struct_ident = &input.ident;
    let span = struct_ident.span();

    let Data::Struct(data_struct) = &input.data else {
        return Err(syn::Error::new(
            input.span(),
            "ForestModel can only be derived for structs",
        ));
    };
    let Fields::Named(fields) = &data_struct.fields else {
        return Err(syn::Error::new(
            data_struct.fields.span(),
            "ForestModel requires named fields",
        ));
    };

    let mut options = Options::default();
    let mut table_name: Option<String> = None;

    for attr in &input.attrs {
        if attr.path().is_ident("forest") {
            parse_forest_attr(attr, &mut options)?;
        }
        if attr.path().is_ident("sea_orm") {
            if let Some(name) = parse_sea_orm_table_name(attr)? {
                table_name = Some(name);
            }
        }
    }

    let id_field_name = options.id_field.take().unwrap_or_else(|| "id".to_string());
    let key_field_name = options.key_field.take().unwrap_or_else(|| "name".to_string());

    let id_field_ident = Ident::new(&id_field_name, span);
    let key_field_ident = Ident::new(&key_field_name, span);

    let mut id_type = options.id_type.take();
    let mut has_key_field = false;
    for field in &fields.named {
        if let Some(ident) = &field.ident {
            if ident == &id_field_ident && id_type.is_none() {
                id_type = Some(field.ty.clone());
            }
            if ident == &key_field_ident {
                has_key_field = true;
            }
        }
    }

    let id_type = id_type.ok_or_else(|| {
        syn::Error::new(
            span,
            "Unable to determine id field type; specify `id_type = ...` in #[forest]",
        )
    })?;
    if !has_key_field {
        return Err(syn::Error::new(
            span,
            format!("key field `{key_field_name}` not found; specify `key_field = ...` in #[forest]"),
        ));
    }

    let entity_name = options.entity_name.take().unwrap_or_else(|| {
        let ident = struct_ident.unraw().to_string();
        match (&table_name, ident.as_str()) {
            (Some(table), "Model") => classify(table),
            _ => ident,
        }
    });
    let hierarchy_name = options
        .hierarchy_name
        .take()
        .unwrap_or_else(|| format!("{entity_name}Hierarchy"));

    let id_column_variant = format_ident!("{}", to_pascal_case(&id_field_name));
    let key_column_variant = format_ident!("{}", to_pascal_case(&key_field_name));

    let entity_name_literal = LitStr::new(&entity_name, span);
    let hierarchy_name_literal = LitStr::new(&hierarchy_name, span);
    let overrides = option_calls(&options, &key_field_name, span)?;

    Ok(quote! {
        impl ::closure_forest::ForestModel for #struct_ident {
            type Entity = Entity;
            type ActiveModel = ActiveModel;
            type Id = #id_type;

            fn forest_config() -> &'static ::closure_forest::ForestConfig {
                static CONFIG: ::closure_forest::__private::Lazy<::closure_forest::ForestConfig> =
                    ::closure_forest::__private::Lazy::new(|| {
                        let base = ::closure_forest::ForestConfig::new(
                            #entity_name_literal,
                            #hierarchy_name_literal,
                        );
                        ::closure_forest::ForestOptions::default()
                            #(#overrides)*
                            .apply(base)
                    });
                &CONFIG
            }

            fn id(&self) -> Self::Id {
                self.#id_field_ident.clone()
            }

            fn key(&self) -> &str {
                self.#key_field_ident.as_str()
            }

            fn set_key(active: &mut Self::ActiveModel, key: &str) {
                active.#key_field_ident = ::sea_orm::ActiveValue::Set(key.to_owned());
            }

            fn id_column() -> <Self::Entity as ::sea_orm::EntityTrait>::Column {
                Column::#id_column_variant
            }

            fn key_column() -> <Self::Entity as ::sea_orm::EntityTrait>::Column {
                Column::#key_column_variant
            }
        }
    })
}

/// `.method("value")` calls for every option set on the attribute.
fn option_calls(options: &Options, key_field: &str, span: Span) -> syn::Result<Vec<TokenStream2>> {
    let mut calls = Vec::new();

    let key_literal = LitStr::new(key_field, span);
    calls.push(quote! { .key_column(#key_literal) });

    let string_options = [
        ("hierarchy_table", &options.hierarchy_table),
        ("ancestor_column", &options.ancestor_column),
        ("descendant_column", &options.descendant_column),
        ("generations_column", &options.generations_column),
    ];
    for (method, value) in string_options {
        if let Some(value) = value {
            let method = format_ident!("{}", method);
            let literal = LitStr::new(value, span);
            calls.push(quote! { .#method(#literal) });
        }
    }

    if let Some(policy) = &options.orphan_policy {
        let variant = match policy.value().as_str() {
            "cascade" => quote! { Cascade },
            "promote" | "promote_children_to_root" => quote! { PromoteChildrenToRoot },
            other => {
                return Err(syn::Error::new(
                    policy.span(),
                    format!("unknown orphan_policy `{other}`; expected `cascade` or `promote_children_to_root`"),
                ))
            }
        };
        calls.push(quote! { .orphan_policy(::closure_forest::OrphanPolicy::#variant) });
    }

    match (&options.order, &options.order_column) {
        (Some(order), Some(_)) => {
            return Err(syn::Error::new(
                order.span(),
                "`order` and `order_column` are mutually exclusive",
            ))
        }
        (Some(order), None) => {
            let strategy = match order.value().as_str() {
                "insertion" => quote! { ::closure_forest::OrderStrategy::Insertion },
                "key" => quote! { ::closure_forest::OrderStrategy::Key },
                other => {
                    return Err(syn::Error::new(
                        order.span(),
                        format!("unknown order `{other}`; expected `insertion` or `key`"),
                    ))
                }
            };
            calls.push(quote! { .order_strategy(#strategy) });
        }
        (None, Some(column)) => {
            let literal = LitStr::new(column, span);
            calls.push(quote! {
                .order_strategy(::closure_forest::OrderStrategy::numeric_column(#literal))
            });
        }
        (None, None) => {}
    }

    if let Some(lock) = &options.advisory_lock {
        let value = lock.value();
        if value == "disabled" {
            calls.push(quote! {
                .advisory_lock_strategy(::closure_forest::AdvisoryLockStrategy::Disabled)
            });
        } else {
            let literal = LitStr::new(&value, lock.span());
            calls.push(quote! {
                .advisory_lock_strategy(::closure_forest::AdvisoryLockStrategy::Namespaced(
                    ::closure_forest::AdvisoryLockKey::new(#literal),
                ))
            });
        }
    }

    Ok(calls)
}

fn parse_forest_attr(attr: &Attribute, options: &mut Options) -> syn::Result<()> {
    attr.parse_nested_meta(|meta| {
        let ident = meta
            .path
            .get_ident()
            .ok_or_else(|| syn::Error::new(meta.path.span(), "Invalid option key"))?
            .to_string();

        if ident == "id_type" {
            let ty: Type = meta.value()?.parse()?;
            options.id_type = Some(ty);
            return Ok(());
        }

        let value: LitStr = meta.value()?.parse()?;
        match ident.as_str() {
            "id_field" => options.id_field = Some(value.value()),
            "key_field" => options.key_field = Some(value.value()),
            "entity_name" => options.entity_name = Some(value.value()),
            "hierarchy_name" => options.hierarchy_name = Some(value.value()),
            "hierarchy_table" => options.hierarchy_table = Some(value.value()),
            "ancestor_column" => options.ancestor_column = Some(value.value()),
            "descendant_column" => options.descendant_column = Some(value.value()),
            "generations_column" => options.generations_column = Some(value.value()),
            "orphan_policy" => options.orphan_policy = Some(value),
            "order" => options.order = Some(value),
            "order_column" => options.order_column = Some(value.value()),
            "advisory_lock" => options.advisory_lock = Some(value),
            other => {
                return Err(syn::Error::new(
                    meta.path.span(),
                    format!("Unsupported forest option `{other}`"),
                ));
            }
        }

        Ok(())
    })
}

fn parse_sea_orm_table_name(attr: &Attribute) -> syn::Result<Option<String>> {
    let mut table_name: Option<String> = None;
    attr.parse_nested_meta(|meta| {
        if meta.path.is_ident("table_name") {
            let value: LitStr = meta.value()?.parse()?;
            table_name = Some(value.value());
        } else if meta.input.peek(syn::Token![=]) {
            // Other `key = value` pairs belong to SeaORM; skip the value.
            let _: syn::Expr = meta.value()?.parse()?;
        }
        Ok(())
    })?;
    Ok(table_name)
}

fn to_pascal_case(value: &str) -> String {
    value
        .split('_')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

/// `user_accounts` -> `UserAccount`, `categories` -> `Category`.
fn classify(table: &str) -> String {
    let singular = if let Some(stem) = table.strip_suffix("ies") {
        format!("{stem}y")
    } else if let Some(stem) = table.strip_suffix("ses") {
        format!("{stem}s")
    } else if let Some(stem) = table.strip_suffix('s') {
        stem.to_string()
    } else {
        table.to_string()
    };
    to_pascal_case(&singular)
}
