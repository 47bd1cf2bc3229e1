use std::env;
use std::fs;
use std::path::Path;

use itertools::Itertools;

// Generates the `ErrorKind` enum consumed by `src/bft/error/mod.rs`.
// Every module directory under `src/bft` contributes one variant, so
// errors can always name the subsystem they came from.

fn main() {
    println!("cargo:rerun-if-changed=src/bft");

    let mut kinds = Vec::new();
    visit(Path::new("src/bft"), &mut Vec::new(), &mut kinds);
    kinds.sort();
    kinds.dedup();

    // the error module itself maps onto the generic kind
    let variants = std::iter::once(String::from("Error"))
        .chain(kinds.into_iter().filter(|kind| kind != "Error"))
        .join(",\n    ");

    let generated = format!(
        "/// Kinds of errors reported by this crate.\n\
         ///\n\
         /// Generated by the build script from the module tree;\n\
         /// one variant per module, plus the generic `Error`.\n\
         #[derive(Debug, Copy, Clone, Eq, PartialEq)]\n\
         pub enum ErrorKind {{\n    {},\n}}\n",
        variants,
    );

    let out_dir = env::var("OUT_DIR").expect("cargo always sets OUT_DIR");
    fs::write(Path::new(&out_dir).join("error_kind.rs"), generated)
        .expect("failed to write generated error kinds");
}

fn visit(dir: &Path, components: &mut Vec<String>, kinds: &mut Vec<String>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_owned(),
            None => continue,
        };
        components.push(name);
        if path.join("mod.rs").is_file() {
            kinds.push(camel_case(components));
        }
        visit(&path, components, kinds);
        components.pop();
    }
}

fn camel_case(components: &[String]) -> String {
    components
        .iter()
        .flat_map(|component| component.split('_'))
        .map(|piece| {
            let mut chars = piece.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .join("")
}
