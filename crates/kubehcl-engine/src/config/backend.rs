//! `backend_storage` blocks

use kubehcl_core::{BackendStorageKind, Diagnostics, SourceRange};
use kubehcl_syntax::Block;

use super::{allowed_attributes, no_labels};

const STORAGE_OPTIONS: &str = "[\"stateless\", \"kube_secret\"]";

/// A declared `backend_storage { <kind> {} }`
#[derive(Debug, Clone, PartialEq)]
pub struct BackendStorage {
    pub kind: BackendStorageKind,
    pub decl_range: SourceRange,
}

/// Decode the `backend_storage` blocks of one file
///
/// `seen` counts blocks across every file of the folder; only the first one
/// is accepted.
pub fn decode_backend_blocks<'a>(
    blocks: impl Iterator<Item = &'a Block>,
    seen: &mut usize,
    diags: &mut Diagnostics,
) -> Option<BackendStorage> {
    let mut out = None;
    for block in blocks {
        *seen += 1;
        if *seen > 1 {
            diags.error(
                "Only one storage block is allowed",
                "One storage block is allowed, please remove unnecessary or duplicated storage blocks",
                &block.type_range,
            );
            continue;
        }
        out = decode_backend_block(block, diags);
    }
    out
}

fn decode_backend_block(block: &Block, diags: &mut Diagnostics) -> Option<BackendStorage> {
    no_labels(block, diags);
    allowed_attributes(&block.body, &[], diags);

    let inner = match block.body.blocks.as_slice() {
        [] => {
            diags.error(
                "Storage block must have at least one block within it",
                format!(
                    "Block {} has no definition within it, valid options are {}",
                    block.kind, STORAGE_OPTIONS
                ),
                &block.type_range,
            );
            return None;
        }
        [inner] => inner,
        _ => {
            diags.error(
                "Storage block must have only one block within it",
                format!("Block {} has 2 or more blocks within it.", block.kind),
                &block.type_range,
            );
            return None;
        }
    };

    match inner.kind.parse::<BackendStorageKind>() {
        Ok(kind) => Some(BackendStorage {
            kind,
            decl_range: inner.type_range.clone(),
        }),
        Err(_) => {
            diags.error(
                "Unsupported block type",
                format!(
                    "Blocks of type {:?} are not expected here, valid options are {}",
                    inner.kind, STORAGE_OPTIONS
                ),
                &inner.type_range,
            );
            None
        }
    }
}
