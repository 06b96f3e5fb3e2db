use darling::{FromDeriveInput, FromField, ast};
use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{DeriveInput, GenericArgument, Ident, Path, PathArguments, Type, parse_macro_input, parse_quote};

#[derive(FromDeriveInput)]
#[darling(attributes(component), supports(struct_named, struct_unit))]
struct ComponentInput {
    ident: Ident,
    generics: syn::Generics,
    data: ast::Data<(), ComponentField>,
    #[darling(multiple)]
    expose: Vec<Type>,
    #[darling(default)]
    disposable: bool,
    #[darling(default)]
    scan: bool,
    #[darling(rename = "crate")]
    krate: Option<Path>,
}

#[derive(FromField)]
#[darling(attributes(component))]
struct ComponentField {
    ident: Option<Ident>,
    ty: Type,
    name: Option<String>,
    #[darling(default)]
    shared: bool,
    #[darling(default)]
    property: bool,
    #[darling(default)]
    inject: bool,
    #[darling(default, rename = "default")]
    fill_default: bool,
}

/// How a field gets its value.
enum Injection<'a> {
    Default,
    Parameter(Parameter<'a>),
    Property { service: &'a Type, required: bool },
}

enum Parameter<'a> {
    Plain(&'a Type),
    Shared(&'a Type),
    Lazy(&'a Type),
    Func(&'a Type),
    FuncWith(&'a Type, &'a Type),
    All(&'a Type),
}

pub fn component_derive_impl(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match ComponentInput::from_derive_input(&input).and_then(|component| component.expand()) {
        Ok(tokens) => tokens.into(),
        Err(e) => e.write_errors().into(),
    }
}

impl ComponentInput {
    fn expand(&self) -> darling::Result<TokenStream2> {
        let krate = self.krate.clone().unwrap_or_else(|| parse_quote!(::qalib));
        let ident = &self.ident;
        let (impl_generics, ty_generics, where_clause) = self.generics.split_for_impl();

        let fields = self
            .data
            .as_ref()
            .take_struct()
            .ok_or_else(|| darling::Error::unsupported_shape("enum"))?;

        let mut errors = darling::Error::accumulator();
        let mut parameters = Vec::new();
        let mut initializers = Vec::new();
        let mut properties = Vec::new();

        for field in fields.iter() {
            let Some(injection) = errors.handle(field.injection()) else {
                continue;
            };
            let Some(member) = field.ident.as_ref() else {
                continue;
            };
            let member_name = member.to_string();

            match injection {
                Injection::Default => {
                    initializers.push(quote! { #member: ::core::default::Default::default() });
                }
                Injection::Parameter(parameter) => {
                    let index = parameters.len();
                    let service_type = parameter.service_type(&krate);
                    parameters.push(match &field.name {
                        Some(name) => quote! { .named_param_of(#member_name, #service_type, #name) },
                        None => quote! { .param_of(#member_name, #service_type) },
                    });
                    let take = parameter.take(index);
                    initializers.push(quote! { #member: #take });
                }
                Injection::Property { service, required } => {
                    initializers.push(quote! { #member: ::core::option::Option::None });
                    let setter = quote! {
                        |this: &mut Self, value: #service| this.#member = ::core::option::Option::Some(value)
                    };
                    properties.push(if required {
                        let name = match &field.name {
                            Some(name) => quote! { ::core::option::Option::Some(#name) },
                            None => quote! { ::core::option::Option::None },
                        };
                        quote! { .inject_property::<#service>(#member_name, #name, #setter) }
                    } else {
                        quote! { .property::<#service>(#member_name, #setter) }
                    });
                }
            }
        }
        errors.finish()?;

        let construct = if fields.style == ast::Style::Unit {
            quote! { |_| ::core::result::Result::Ok(Self) }
        } else if parameters.is_empty() {
            quote! { |_| ::core::result::Result::Ok(Self { #(#initializers),* }) }
        } else {
            quote! { |mut __args| ::core::result::Result::Ok(Self { #(#initializers),* }) }
        };

        let exposures = self.expose.iter().map(|service| {
            quote! { .implements::<#service>(|this| this as #service) }
        });

        let disposable = self.disposable.then(|| quote! { .disposable() });

        let scan = self.scan.then(|| {
            quote! {
                #krate::inventory::submit! {
                    #krate::composition::ComponentDescriptor::new(
                        <#ident as #krate::metadata::Component>::type_info,
                        ::core::module_path!(),
                    )
                }
            }
        });

        Ok(quote! {
            impl #impl_generics #krate::metadata::Component for #ident #ty_generics #where_clause {
                fn type_info() -> #krate::metadata::TypeInfo {
                    #krate::metadata::TypeInfo::builder::<Self>()
                        .constructor(|p| p #(#parameters)*, #construct)
                        #(#properties)*
                        #(#exposures)*
                        #disposable
                        .build()
                }
            }

            #scan
        })
    }
}

impl ComponentField {
    fn injection(&self) -> darling::Result<Injection<'_>> {
        let is_property = self.property || self.inject;
        let modes = [self.fill_default, is_property, self.shared];
        if modes.iter().filter(|set| **set).count() > 1 {
            return Err(darling::Error::custom("`default`, `property`/`inject` and `shared` cannot be combined")
                .with_span(&self.ty));
        }

        if self.fill_default {
            if self.name.is_some() {
                return Err(darling::Error::custom("`default` fields are not injected and take no `name`")
                    .with_span(&self.ty));
            }
            return Ok(Injection::Default);
        }

        if is_property {
            if self.name.is_some() && !self.inject {
                return Err(darling::Error::custom("a named property must be marked `inject`").with_span(&self.ty));
            }
            let service = single_argument(&self.ty, "Option")
                .ok_or_else(|| darling::Error::custom("properties must be declared as `Option<T>`").with_span(&self.ty))?;
            return Ok(Injection::Property {
                service,
                required: self.inject,
            });
        }

        if self.shared {
            let service = single_argument(&self.ty, "Arc")
                .ok_or_else(|| darling::Error::custom("`shared` fields must be declared as `Arc<T>`").with_span(&self.ty))?;
            return Ok(Injection::Parameter(Parameter::Shared(service)));
        }

        Ok(Injection::Parameter(Parameter::detect(&self.ty)))
    }
}

impl<'a> Parameter<'a> {
    fn detect(ty: &'a Type) -> Self {
        if let Some(target) = single_argument(ty, "Lazy") {
            return Parameter::Lazy(target);
        }
        if let Some(result) = single_argument(ty, "Func") {
            return Parameter::Func(result);
        }
        if let Some([argument, result]) = type_arguments(ty, "FuncWith").as_deref() {
            return Parameter::FuncWith(*argument, *result);
        }
        if let Some(element) = single_argument(ty, "All") {
            return Parameter::All(element);
        }
        Parameter::Plain(ty)
    }

    fn service_type(&self, krate: &Path) -> TokenStream2 {
        let of = |ty: &Type| quote! { #krate::types::ServiceType::of::<#ty>() };
        match self {
            Parameter::Plain(ty) | Parameter::Shared(ty) => of(ty),
            Parameter::Lazy(ty) => {
                let inner = of(ty);
                quote! { #krate::types::ServiceType::lazy(#inner) }
            }
            Parameter::Func(ty) => {
                let inner = of(ty);
                quote! { #krate::types::ServiceType::func(#inner) }
            }
            Parameter::FuncWith(argument, result) => {
                let argument = of(argument);
                let result = of(result);
                quote! { #krate::types::ServiceType::func_with(::std::vec![#argument], #result) }
            }
            Parameter::All(ty) => {
                let inner = of(ty);
                quote! { #krate::types::ServiceType::enumerable(#inner) }
            }
        }
    }

    fn take(&self, index: usize) -> TokenStream2 {
        match self {
            Parameter::Plain(ty) => quote! { __args.take::<#ty>(#index)? },
            Parameter::Shared(ty) => quote! { __args.take_shared::<#ty>(#index)? },
            Parameter::Lazy(ty) => quote! { __args.take_lazy::<#ty>(#index)? },
            Parameter::Func(ty) => quote! { __args.take_func::<#ty>(#index)? },
            Parameter::FuncWith(argument, result) => {
                quote! { __args.take_func_with::<#argument, #result>(#index)? }
            }
            Parameter::All(ty) => quote! { __args.take_all::<#ty>(#index)? },
        }
    }
}

/// The generic arguments of `ty` when its last path segment is `wrapper`.
fn type_arguments<'a>(ty: &'a Type, wrapper: &str) -> Option<Vec<&'a Type>> {
    let Type::Path(path) = ty else {
        return None;
    };
    let segment = path.path.segments.last()?;
    if segment.ident != wrapper {
        return None;
    }
    let PathArguments::AngleBracketed(arguments) = &segment.arguments else {
        return None;
    };
    Some(
        arguments
            .args
            .iter()
            .filter_map(|argument| match argument {
                GenericArgument::Type(ty) => Some(ty),
                _ => None,
            })
            .collect(),
    )
}

fn single_argument<'a>(ty: &'a Type, wrapper: &str) -> Option<&'a Type> {
    match type_arguments(ty, wrapper)?.as_slice() {
        [only] => Some(*only),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapper_fields_are_recognised_by_type() {
        let lazy: Type = parse_quote!(Lazy<Arc<dyn Repo>>);
        let func_with: Type = parse_quote!(qalib::FuncWith<u32, String>);
        let plain: Type = parse_quote!(Arc<dyn Repo>);

        assert!(matches!(Parameter::detect(&lazy), Parameter::Lazy(_)));
        assert!(matches!(Parameter::detect(&func_with), Parameter::FuncWith(_, _)));
        assert!(matches!(Parameter::detect(&plain), Parameter::Plain(_)));
    }

    #[test]
    fn expands_constructor_and_exposures() {
        let input: DeriveInput = parse_quote! {
            #[component(expose = "Arc<dyn Repo>")]
            struct SqlRepo {
                pool: Arc<dyn Pool>,
                #[component(property)]
                audit: Option<Arc<dyn Audit>>,
            }
        };
        let tokens: String = ComponentInput::from_derive_input(&input)
            .unwrap()
            .expand()
            .unwrap()
            .to_string()
            .split_whitespace()
            .collect();

        assert!(tokens.contains(".param_of(\"pool\""));
        assert!(tokens.contains(".property::<Arc<dynAudit>>(\"audit\""));
        assert!(tokens.contains(".implements::<Arc<dynRepo>>"));
        assert!(!tokens.contains("inventory"));
    }

    #[test]
    fn property_must_be_an_option() {
        let input: DeriveInput = parse_quote! {
            struct Broken {
                #[component(property)]
                audit: Arc<dyn Audit>,
            }
        };
        let result = ComponentInput::from_derive_input(&input).unwrap().expand();
        assert!(result.is_err());
    }

    #[test]
    fn enums_are_rejected() {
        let input: DeriveInput = parse_quote! {
            enum Mode { A, B }
        };
        assert!(ComponentInput::from_derive_input(&input).is_err());
    }
}
