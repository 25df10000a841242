//! `locals` and `default_annotations` blocks

use kubehcl_core::{AddrKind, Address, AddressMap, Diagnostics, SourceRange};
use kubehcl_syntax::{Block, Expr};

use super::{just_attributes, no_labels};

/// One `name = expr` entry of a locals or default_annotations block
#[derive(Debug, Clone)]
pub struct NamedExpr {
    pub name: String,
    pub expr: Expr,
    pub range: SourceRange,
}

pub fn decode_locals_blocks<'a>(
    blocks: impl Iterator<Item = &'a Block>,
    addrs: &mut AddressMap,
    diags: &mut Diagnostics,
) -> Vec<NamedExpr> {
    decode_attribute_blocks(blocks, AddrKind::Local, "Locals", "locals", addrs, diags)
}

pub fn decode_annotation_blocks<'a>(
    blocks: impl Iterator<Item = &'a Block>,
    addrs: &mut AddressMap,
    diags: &mut Diagnostics,
) -> Vec<NamedExpr> {
    decode_attribute_blocks(
        blocks,
        AddrKind::Annotation,
        "Annotations",
        "annotations",
        addrs,
        diags,
    )
}

fn decode_attribute_blocks<'a>(
    blocks: impl Iterator<Item = &'a Block>,
    kind: AddrKind,
    plural: &str,
    noun: &str,
    addrs: &mut AddressMap,
    diags: &mut Diagnostics,
) -> Vec<NamedExpr> {
    let mut out = Vec::new();
    for block in blocks {
        no_labels(block, diags);
        just_attributes(&block.body, diags);
        for attr in &block.body.attributes {
            if addrs
                .insert(Address::new(kind, attr.name.clone()), &attr.name_range)
                .is_err()
            {
                diags.error(
                    format!("{} must have different names", plural),
                    format!("Two {} have the same name: {}", noun, attr.name),
                    &attr.name_range,
                );
                continue;
            }
            out.push(NamedExpr {
                name: attr.name.clone(),
                expr: attr.expr.clone(),
                range: attr.range.clone(),
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubehcl_syntax::parse_file;

    #[test]
    fn test_locals_keep_declaration_order() {
        let (body, mut diags) = parse_file("locals {\n  b = 1\n  a = b\n}\n", "l.hcl");
        let mut addrs = AddressMap::new();
        let locals = decode_locals_blocks(body.blocks_of("locals"), &mut addrs, &mut diags);
        let names: Vec<_> = locals.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn test_duplicates_across_blocks() {
        let src = "default_annotations {\n  team = \"a\"\n}\ndefault_annotations {\n  team = \"b\"\n}\n";
        let (body, mut diags) = parse_file(src, "a.hcl");
        let mut addrs = AddressMap::new();
        let annotations =
            decode_annotation_blocks(body.blocks_of("default_annotations"), &mut addrs, &mut diags);
        assert_eq!(annotations.len(), 1);
        let err = diags.errors().next().unwrap();
        assert_eq!(err.summary, "Annotations must have different names");
        assert_eq!(err.detail, "Two annotations have the same name: team");
    }

    #[test]
    fn test_local_and_annotation_names_do_not_clash() {
        let src = "locals {\n  team = 1\n}\ndefault_annotations {\n  team = \"x\"\n}\n";
        let (body, mut diags) = parse_file(src, "a.hcl");
        let mut addrs = AddressMap::new();
        decode_locals_blocks(body.blocks_of("locals"), &mut addrs, &mut diags);
        decode_annotation_blocks(body.blocks_of("default_annotations"), &mut addrs, &mut diags);
        assert!(!diags.has_errors());
    }
}
