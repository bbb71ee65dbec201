use proc_macro::TokenStream;
use quote::quote;
use syn::parse_macro_input;

/// Derives the `Logging` CSV contract for a plain record struct: `header`
/// joins the field names, `Display` renders one row. `Option` fields render
/// as empty cells when `None` so absent values never show up as zero.
#[proc_macro_derive(Logging)]
pub fn logging_derive(input: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(input as syn::DeriveInput);
    impl_logging(&ast)
}

fn impl_logging(ast: &syn::DeriveInput) -> TokenStream {
    let name = &ast.ident;
    let fields = match &ast.data {
        syn::Data::Struct(syn::DataStruct {
            fields: syn::Fields::Named(syn::FieldsNamed { ref named, .. }),
            ..
        }) => named,
        _ => panic!("Only structs with named fields are supported"),
    };

    let header = fields
        .iter()
        .map(|field| field.ident.as_ref().unwrap().to_string())
        .collect::<Vec<_>>()
        .join(",");

    let cells = fields.iter().map(|field| {
        let field_name = field.ident.as_ref().unwrap();
        if is_option(&field.ty) {
            quote! {
                self.#field_name
                    .as_ref()
                    .map(|value| value.to_string())
                    .unwrap_or_default()
            }
        } else {
            quote! { self.#field_name.to_string() }
        }
    });

    let expanded = quote! {
        impl Logging for #name {
            fn header(&self) -> String {
                concat!(#header, "\n").to_string()
            }
        }

        impl std::fmt::Display for #name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                let cells = [#(#cells),*];
                writeln!(f, "{}", cells.join(","))
            }
        }
    };
    expanded.into()
}

fn is_option(ty: &syn::Type) -> bool {
    match ty {
        syn::Type::Path(path) => path
            .path
            .segments
            .last()
            .map(|segment| segment.ident == "Option")
            .unwrap_or(false),
        _ => false,
    }
}
