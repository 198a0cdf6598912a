//! Record-kind registry.
//!
//! Maps a record's table (and, for blocks, its `type` field) onto a closed
//! set of kind tags. The mapping is an explicit lookup table rather than
//! open-ended dispatch on whatever string the authority sends; kinds the
//! registry does not know collapse into catch-all variants so unknown data
//! is tolerated without being misread as something it is not.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde_json::Value;

use crate::record::Table;

/// Kind of a `block`-table record, keyed by its `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
    Page,
    Text,
    Header,
    SubHeader,
    SubSubHeader,
    BulletedList,
    NumberedList,
    Toggle,
    Todo,
    Quote,
    Callout,
    Divider,
    Code,
    Equation,
    Image,
    Video,
    Audio,
    File,
    Pdf,
    Bookmark,
    Embed,
    Column,
    ColumnList,
    TableOfContents,
    Breadcrumb,
    CollectionViewBlock,
    CollectionViewPage,
    LinkToCollection,
    Factory,
    /// A block type the registry does not know about.
    Unrecognized,
}

/// Kind of any record, keyed by its table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Block(BlockKind),
    Collection,
    CollectionView,
    Space,
    SpaceView,
    User,
    /// A table the registry does not know about.
    Unknown,
}

static BLOCK_KINDS: Lazy<HashMap<&'static str, BlockKind>> = Lazy::new(|| {
    HashMap::from([
        ("page", BlockKind::Page),
        ("text", BlockKind::Text),
        ("header", BlockKind::Header),
        ("sub_header", BlockKind::SubHeader),
        ("sub_sub_header", BlockKind::SubSubHeader),
        ("bulleted_list", BlockKind::BulletedList),
        ("numbered_list", BlockKind::NumberedList),
        ("toggle", BlockKind::Toggle),
        ("to_do", BlockKind::Todo),
        ("quote", BlockKind::Quote),
        ("callout", BlockKind::Callout),
        ("divider", BlockKind::Divider),
        ("code", BlockKind::Code),
        ("equation", BlockKind::Equation),
        ("image", BlockKind::Image),
        ("video", BlockKind::Video),
        ("audio", BlockKind::Audio),
        ("file", BlockKind::File),
        ("pdf", BlockKind::Pdf),
        ("bookmark", BlockKind::Bookmark),
        ("embed", BlockKind::Embed),
        ("column", BlockKind::Column),
        ("column_list", BlockKind::ColumnList),
        ("table_of_contents", BlockKind::TableOfContents),
        ("breadcrumb", BlockKind::Breadcrumb),
        ("collection_view", BlockKind::CollectionViewBlock),
        ("collection_view_page", BlockKind::CollectionViewPage),
        ("link_to_collection", BlockKind::LinkToCollection),
        ("factory", BlockKind::Factory),
    ])
});

/// Classify a record by table and (for blocks) its `type` field.
pub fn classify(table: &Table, value: Option<&Value>) -> RecordKind {
    match table.as_str() {
        "block" => {
            let kind = value
                .and_then(|value| value.get("type"))
                .and_then(Value::as_str)
                .and_then(|name| BLOCK_KINDS.get(name).copied())
                .unwrap_or(BlockKind::Unrecognized);
            RecordKind::Block(kind)
        }
        "collection" => RecordKind::Collection,
        "collection_view" => RecordKind::CollectionView,
        "space" => RecordKind::Space,
        "space_view" => RecordKind::SpaceView,
        "notion_user" => RecordKind::User,
        _ => RecordKind::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn known_block_types_classify() {
        let kind = classify(&Table::block(), Some(&json!({ "type": "to_do" })));
        assert_eq!(kind, RecordKind::Block(BlockKind::Todo));
    }

    #[test]
    fn unknown_block_type_is_unrecognized_not_an_error() {
        let kind = classify(&Table::block(), Some(&json!({ "type": "hologram" })));
        assert_eq!(kind, RecordKind::Block(BlockKind::Unrecognized));

        let untyped = classify(&Table::block(), Some(&json!({})));
        assert_eq!(untyped, RecordKind::Block(BlockKind::Unrecognized));
    }

    #[test]
    fn non_block_tables_classify_by_table_alone() {
        assert_eq!(classify(&Table::space(), None), RecordKind::Space);
        assert_eq!(classify(&Table::user(), None), RecordKind::User);
        assert_eq!(classify(&Table::new("mystery"), None), RecordKind::Unknown);
    }
}
