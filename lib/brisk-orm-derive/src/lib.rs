use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::ext::IdentExt;
use syn::meta::ParseNestedMeta;
use syn::{Data, DeriveInput, Fields, Lit, LitStr, parse_macro_input};

/// Convert snake_case to camelCase
fn to_camel_case(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut capitalize_next = false;

    for c in s.chars() {
        if c == '_' {
            capitalize_next = true;
        } else if capitalize_next {
            result.push(c.to_ascii_uppercase());
            capitalize_next = false;
        } else {
            result.push(c);
        }
    }

    result
}

/// Type as a string with spaces removed
fn type_string(ty: &syn::Type) -> String {
    quote!(#ty).to_string().replace(' ', "")
}

fn is_option(ty: &syn::Type) -> bool {
    let s = type_string(ty);
    s.starts_with("Option<") || s.starts_with("std::option::Option<")
}

/// Inner type of Option<T>, or the type itself
fn strip_option(ty: &syn::Type) -> String {
    let s = type_string(ty);
    for prefix in ["std::option::Option<", "Option<"] {
        if let Some(inner) = s.strip_prefix(prefix).and_then(|s| s.strip_suffix('>')) {
            return inner.to_string();
        }
    }
    s
}

/// Last path segment of a type string, without generics
fn base_name(type_str: &str) -> &str {
    let without_generics = type_str.split('<').next().unwrap_or(type_str);
    without_generics
        .rsplit("::")
        .next()
        .unwrap_or(without_generics)
}

/// Map Rust type to the declared property kind
fn property_kind(ty: &syn::Type) -> TokenStream2 {
    let inner = strip_option(ty);
    match base_name(&inner) {
        "String" | "str" | "char" => quote!(::brisk_orm::PropertyKind::String),
        "i8" | "i16" | "i32" | "i64" | "i128" | "isize" | "u8" | "u16" | "u32" | "u64"
        | "u128" | "usize" | "f32" | "f64" => quote!(::brisk_orm::PropertyKind::Number),
        "bool" => quote!(::brisk_orm::PropertyKind::Boolean),
        "NaiveDateTime" | "DateTime" | "NaiveDate" => quote!(::brisk_orm::PropertyKind::Date),
        "Vec" | "HashSet" | "BTreeSet" => quote!(::brisk_orm::PropertyKind::Array),
        "Value" | "Map" | "HashMap" | "BTreeMap" => quote!(::brisk_orm::PropertyKind::Object),
        other => quote!(::brisk_orm::PropertyKind::Named(#other.to_string())),
    }
}

fn column_type_variant(name: &LitStr) -> syn::Result<TokenStream2> {
    let variant = match name.value().to_ascii_lowercase().as_str() {
        "int" => quote!(Int),
        "bigint" => quote!(BigInt),
        "double" => quote!(Double),
        "float" => quote!(Float),
        "varchar" => quote!(Varchar),
        "text" => quote!(Text),
        "json" => quote!(Json),
        "datetime" => quote!(Datetime),
        "date" => quote!(Date),
        "time" => quote!(Time),
        "tinyint" => quote!(TinyInt),
        "geometry" => quote!(Geometry),
        other => {
            return Err(syn::Error::new(
                name.span(),
                format!("unknown column type `{}`", other),
            ));
        }
    };
    Ok(quote!(::brisk_orm::ColumnType::#variant))
}

fn foreign_action_variant(name: &LitStr) -> syn::Result<TokenStream2> {
    let variant = match name.value().to_ascii_lowercase().replace(' ', "_").as_str() {
        "cascade" => quote!(Cascade),
        "set_null" => quote!(SetNull),
        "no_action" => quote!(NoAction),
        other => {
            return Err(syn::Error::new(
                name.span(),
                format!("unknown foreign key action `{}`", other),
            ));
        }
    };
    Ok(quote!(::brisk_orm::ForeignAction::#variant))
}

/// Literal as a `brisk_orm::Value` expression
fn value_tokens(lit: &Lit) -> syn::Result<TokenStream2> {
    match lit {
        Lit::Int(i) => {
            let v: i64 = i.base10_parse()?;
            Ok(quote!(::brisk_orm::Value::Int(#v)))
        }
        Lit::Float(f) => {
            let v: f64 = f.base10_parse()?;
            Ok(quote!(::brisk_orm::Value::Float(#v)))
        }
        Lit::Str(s) => Ok(quote!(::brisk_orm::Value::String(#s.to_string()))),
        Lit::Bool(b) => Ok(quote!(::brisk_orm::Value::Bool(#b))),
        other => Err(syn::Error::new(other.span(), "unsupported literal")),
    }
}

fn parse_str_value(meta: &ParseNestedMeta) -> syn::Result<LitStr> {
    meta.value()?.parse()
}

/// Consume the value of a meta item we do not interpret
fn skip_meta_value(meta: &ParseNestedMeta) -> syn::Result<()> {
    if meta.input.peek(syn::Token![=]) {
        let _: syn::Expr = meta.value()?.parse()?;
    } else if meta.input.peek(syn::token::Paren) {
        let content;
        syn::parenthesized!(content in meta.input);
        let _: TokenStream2 = content.parse()?;
    }
    Ok(())
}

/// Has the attribute arguments in parentheses, e.g. `#[column(...)]` rather than `#[column]`
fn has_args(attr: &syn::Attribute) -> bool {
    matches!(attr.meta, syn::Meta::List(_))
}

struct TableAttr {
    name: LitStr,
    charset: Option<LitStr>,
    collate: Option<LitStr>,
    engine: Option<LitStr>,
    soft_delete: bool,
}

/// Parse #[table(name = "...", ...)]
fn parse_table_attr(input: &DeriveInput) -> syn::Result<Option<TableAttr>> {
    for attr in &input.attrs {
        if !attr.path().is_ident("table") {
            continue;
        }
        let mut name = None;
        let mut charset = None;
        let mut collate = None;
        let mut engine = None;
        let mut soft_delete = false;
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                name = Some(parse_str_value(&meta)?);
            } else if meta.path.is_ident("charset") {
                charset = Some(parse_str_value(&meta)?);
            } else if meta.path.is_ident("collate") {
                collate = Some(parse_str_value(&meta)?);
            } else if meta.path.is_ident("engine") {
                engine = Some(parse_str_value(&meta)?);
            } else if meta.path.is_ident("soft_delete") {
                soft_delete = true;
            } else {
                return Err(meta.error("unknown table attribute"));
            }
            Ok(())
        })?;
        let name = name.ok_or_else(|| syn::Error::new_spanned(attr, "table requires `name`"))?;
        return Ok(Some(TableAttr {
            name,
            charset,
            collate,
            engine,
            soft_delete,
        }));
    }
    Ok(None)
}

/// Parse #[serde(rename_all = "...")] on the struct
fn parse_rename_all(input: &DeriveInput) -> syn::Result<Option<String>> {
    let mut rename_all = None;
    for attr in input.attrs.iter().filter(|a| a.path().is_ident("serde")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("rename_all") {
                rename_all = Some(parse_str_value(&meta)?.value());
            } else {
                skip_meta_value(&meta)?;
            }
            Ok(())
        })?;
    }
    Ok(rename_all)
}

/// Serialized name of a field, honoring #[serde(rename = "...")]
fn property_key(field: &syn::Field, rename_all: Option<&str>) -> syn::Result<String> {
    for attr in field.attrs.iter().filter(|a| a.path().is_ident("serde")) {
        let mut rename = None;
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("rename") && meta.input.peek(syn::Token![=]) {
                rename = Some(parse_str_value(&meta)?.value());
            } else {
                skip_meta_value(&meta)?;
            }
            Ok(())
        })?;
        if let Some(rename) = rename {
            return Ok(rename);
        }
    }
    let ident = field
        .ident
        .as_ref()
        .map(|i| i.unraw().to_string())
        .unwrap_or_default();
    Ok(match rename_all {
        Some("camelCase") => to_camel_case(&ident),
        _ => ident,
    })
}

#[derive(Default)]
struct ColumnAttr {
    present: bool,
    primary_key: bool,
    name: Option<LitStr>,
    column_type: Option<LitStr>,
    length: Option<u32>,
    precision: Option<u32>,
    not_null: bool,
    auto_increment: bool,
    default: Option<Lit>,
    delete_value: Option<Lit>,
    delete_value_fn: Option<syn::Path>,
    unique_keys: Vec<LitStr>,
}

impl ColumnAttr {
    fn parse_item(&mut self, meta: &ParseNestedMeta) -> syn::Result<()> {
        if meta.path.is_ident("name") {
            self.name = Some(parse_str_value(meta)?);
        } else if meta.path.is_ident("column_type") {
            self.column_type = Some(parse_str_value(meta)?);
        } else if meta.path.is_ident("length") {
            let lit: syn::LitInt = meta.value()?.parse()?;
            self.length = Some(lit.base10_parse()?);
        } else if meta.path.is_ident("precision") {
            let lit: syn::LitInt = meta.value()?.parse()?;
            self.precision = Some(lit.base10_parse()?);
        } else if meta.path.is_ident("not_null") {
            self.not_null = true;
        } else if meta.path.is_ident("auto_increment") {
            self.auto_increment = true;
        } else if meta.path.is_ident("default") {
            self.default = Some(meta.value()?.parse()?);
        } else if meta.path.is_ident("delete_value") {
            self.delete_value = Some(meta.value()?.parse()?);
        } else if meta.path.is_ident("delete_value_fn") {
            let path = parse_str_value(meta)?;
            self.delete_value_fn = Some(path.parse()?);
        } else if meta.path.is_ident("unique_key") {
            self.unique_keys.push(parse_str_value(meta)?);
        } else {
            return Err(meta.error("unknown column attribute"));
        }
        Ok(())
    }
}

/// Parse #[primary_key(...)] and #[column(...)] on a field
fn parse_column_attr(field: &syn::Field) -> syn::Result<ColumnAttr> {
    let mut column = ColumnAttr::default();
    for attr in &field.attrs {
        let is_primary_key = attr.path().is_ident("primary_key");
        if !is_primary_key && !attr.path().is_ident("column") {
            continue;
        }
        column.present = true;
        column.primary_key |= is_primary_key;
        if has_args(attr) {
            attr.parse_nested_meta(|meta| column.parse_item(&meta))?;
        }
    }
    Ok(column)
}

struct ForeignKeyAttr {
    entity: LitStr,
    property: LitStr,
    action: TokenStream2,
}

/// Parse #[foreign_key(entity = "...", property = "...", action = "...")]
fn parse_foreign_key_attr(field: &syn::Field) -> syn::Result<Option<ForeignKeyAttr>> {
    let Some(attr) = field.attrs.iter().find(|a| a.path().is_ident("foreign_key")) else {
        return Ok(None);
    };
    let mut entity = None;
    let mut property = None;
    let mut action = quote!(::brisk_orm::ForeignAction::Cascade);
    attr.parse_nested_meta(|meta| {
        if meta.path.is_ident("entity") {
            entity = Some(parse_str_value(&meta)?);
        } else if meta.path.is_ident("property") {
            property = Some(parse_str_value(&meta)?);
        } else if meta.path.is_ident("action") {
            action = foreign_action_variant(&parse_str_value(&meta)?)?;
        } else {
            return Err(meta.error("unknown foreign_key attribute"));
        }
        Ok(())
    })?;
    match (entity, property) {
        (Some(entity), Some(property)) => Ok(Some(ForeignKeyAttr {
            entity,
            property,
            action,
        })),
        _ => Err(syn::Error::new_spanned(
            attr,
            "foreign_key requires `entity` and `property`",
        )),
    }
}

/// Parse #[relation(entity = "...", source = "...", target = "...", many)]
fn parse_relation_attr(field: &syn::Field) -> syn::Result<Option<TokenStream2>> {
    let Some(attr) = field.attrs.iter().find(|a| a.path().is_ident("relation")) else {
        return Ok(None);
    };
    let mut entity = None;
    let mut source = None;
    let mut target = None;
    let mut many = false;
    attr.parse_nested_meta(|meta| {
        if meta.path.is_ident("entity") {
            entity = Some(parse_str_value(&meta)?);
        } else if meta.path.is_ident("source") {
            source = Some(parse_str_value(&meta)?);
        } else if meta.path.is_ident("target") {
            target = Some(parse_str_value(&meta)?);
        } else if meta.path.is_ident("many") {
            many = true;
        } else {
            return Err(meta.error("unknown relation attribute"));
        }
        Ok(())
    })?;
    match (entity, source, target) {
        (Some(entity), Some(source), Some(target)) => Ok(Some(quote! {
            ::brisk_orm::RelationMeta {
                entity: #entity.to_string(),
                source_column: #source.to_string(),
                target_column: #target.to_string(),
                many: #many,
            }
        })),
        _ => Err(syn::Error::new_spanned(
            attr,
            "relation requires `entity`, `source` and `target`",
        )),
    }
}

fn column_meta_tokens(
    field: &syn::Field,
    column: &ColumnAttr,
    foreign_key: Option<&ForeignKeyAttr>,
) -> syn::Result<TokenStream2> {
    let db_name = match &column.name {
        Some(name) => name.value(),
        None => field
            .ident
            .as_ref()
            .map(|i| i.unraw().to_string())
            .unwrap_or_default(),
    };

    let mut meta = if column.primary_key {
        quote!(::brisk_orm::ColumnMeta::primary_key(#db_name))
    } else {
        quote!(::brisk_orm::ColumnMeta::new(#db_name))
    };
    if let Some(column_type) = &column.column_type {
        let variant = column_type_variant(column_type)?;
        meta = quote!(#meta.column_type(#variant));
    }
    if let Some(length) = column.length {
        meta = quote!(#meta.length(#length));
    }
    if let Some(precision) = column.precision {
        meta = quote!(#meta.precision(#precision));
    }
    if column.not_null || !is_option(&field.ty) {
        meta = quote!(#meta.not_null());
    }
    if column.auto_increment {
        meta = quote!(#meta.auto_increment());
    }
    if let Some(default) = &column.default {
        let value = value_tokens(default)?;
        meta = quote!(#meta.default_value(#value));
    }
    if let Some(path) = &column.delete_value_fn {
        meta = quote!(#meta.delete_value(::brisk_orm::DeleteValue::producer(#path)));
    } else if let Some(delete_value) = &column.delete_value {
        let value = value_tokens(delete_value)?;
        meta = quote!(#meta.delete_value(::brisk_orm::DeleteValue::literal(#value)));
    }
    for group in &column.unique_keys {
        meta = quote!(#meta.unique_key(#group));
    }
    if let Some(fk) = foreign_key {
        let (entity, property, action) = (&fk.entity, &fk.property, &fk.action);
        meta = quote!(#meta.foreign_key(#entity, #property, #action));
    }
    Ok(meta)
}

/// Derive macro for the Entity trait
///
/// Generates `Entity::descriptor()` from struct and field attributes.
///
/// ## Struct attributes
/// - `#[table(name = "...", charset = "...", collate = "...", engine = "...", soft_delete)]`
///   declares the backing table. Without it the type has no table and no generated Dao.
///
/// ## Field attributes
/// - `#[primary_key]` / `#[primary_key(auto_increment, ...)]` - primary key column
/// - `#[column]` / `#[column(name = "...", column_type = "varchar", length = 64, precision = 2,
///   not_null, auto_increment, default = 0, delete_value = 1, delete_value_fn = "path",
///   unique_key = "group")]` - persisted column; `unique_key` may repeat
/// - `#[foreign_key(entity = "Other", property = "id", action = "cascade")]` - foreign key
///   to a property of another entity (implies a column)
/// - `#[relation(entity = "Other", source = "id", target = "owner_id", many)]` - property
///   hydrated from the related entity's table
///
/// Fields without these attributes are plain properties. Non-`Option` column fields are
/// `not null`. Property keys follow `#[serde(rename)]` and `#[serde(rename_all = "camelCase")]`.
///
/// ## Example
///
/// ```text
/// #[derive(Serialize, Deserialize, Entity)]
/// #[table(name = "post", soft_delete)]
/// struct Post {
///     #[primary_key(auto_increment)]
///     pub id: Option<i64>,
///     #[column(length = 128)]
///     pub title: String,
///     #[foreign_key(entity = "User", property = "id")]
///     pub author_id: i64,
/// }
/// ```
#[proc_macro_derive(Entity, attributes(table, primary_key, column, foreign_key, relation))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand_entity(&input) {
        Ok(tokens) => tokens.into(),
        Err(e) => e.to_compile_error().into(),
    }
}

fn expand_entity(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let name_str = name.unraw().to_string();
    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    name,
                    "Entity can only be derived for structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                name,
                "Entity can only be derived for structs",
            ));
        }
    };

    let table = match parse_table_attr(input)? {
        Some(table) => {
            let table_name = &table.name;
            let mut meta = quote!(::brisk_orm::TableMeta::new(#table_name));
            if let Some(charset) = &table.charset {
                meta = quote!(#meta.charset(#charset));
            }
            if let Some(collate) = &table.collate {
                meta = quote!(#meta.collate(#collate));
            }
            if let Some(engine) = &table.engine {
                meta = quote!(#meta.engine(#engine));
            }
            if table.soft_delete {
                meta = quote!(#meta.soft_delete());
            }
            quote!(.table(#meta))
        }
        None => quote!(),
    };

    let rename_all = parse_rename_all(input)?;
    let mut properties = Vec::with_capacity(fields.len());
    for field in fields {
        let key = property_key(field, rename_all.as_deref())?;
        let kind = property_kind(&field.ty);

        if let Some(relation) = parse_relation_attr(field)? {
            properties.push(quote!(::brisk_orm::PropertyDescriptor::relation(#key, #relation)));
            continue;
        }

        let column = parse_column_attr(field)?;
        let foreign_key = parse_foreign_key_attr(field)?;
        if column.present || foreign_key.is_some() {
            let meta = column_meta_tokens(field, &column, foreign_key.as_ref())?;
            properties.push(quote!(::brisk_orm::PropertyDescriptor::column(#key, #kind, #meta)));
        } else {
            properties.push(quote!(::brisk_orm::PropertyDescriptor::plain(#key, #kind)));
        }
    }

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    Ok(quote! {
        impl #impl_generics ::brisk_orm::Entity for #name #ty_generics #where_clause {
            fn descriptor() -> ::brisk_orm::TypeDescriptor {
                ::brisk_orm::TypeDescriptor::new(#name_str)
                    #table
                    #(.property(#properties))*
            }
        }
    })
}
