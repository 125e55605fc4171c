//! Engine event vocabulary
//!
//! Every schema and document lifecycle transition triggers one of these
//! events on the engine's emitter. Listeners subscribe by name; the
//! wildcard channel observes everything.

use std::fmt;

/// Events emitted by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseEvent {
    DatabaseCreate,
    DatabaseDelete,
    CollectionCreate,
    CollectionRead,
    CollectionList,
    CollectionUpdate,
    CollectionDelete,
    AttributeCreate,
    AttributeUpdate,
    AttributeDelete,
    IndexCreate,
    IndexRename,
    IndexDelete,
    PermissionsCreate,
    PermissionsRead,
    PermissionsUpdate,
    PermissionsDelete,
    DocumentCreate,
    DocumentRead,
    DocumentFind,
    DocumentUpdate,
    DocumentDelete,
    DocumentCount,
    DocumentSum,
    DocumentIncrease,
    DocumentDecrease,
    DocumentPurge,
    DocumentsCreate,
    DocumentsUpdate,
    DocumentsDelete,
}

impl DatabaseEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseEvent::DatabaseCreate => "database_create",
            DatabaseEvent::DatabaseDelete => "database_delete",
            DatabaseEvent::CollectionCreate => "collection_create",
            DatabaseEvent::CollectionRead => "collection_read",
            DatabaseEvent::CollectionList => "collection_list",
            DatabaseEvent::CollectionUpdate => "collection_update",
            DatabaseEvent::CollectionDelete => "collection_delete",
            DatabaseEvent::AttributeCreate => "attribute_create",
            DatabaseEvent::AttributeUpdate => "attribute_update",
            DatabaseEvent::AttributeDelete => "attribute_delete",
            DatabaseEvent::IndexCreate => "index_create",
            DatabaseEvent::IndexRename => "index_rename",
            DatabaseEvent::IndexDelete => "index_delete",
            DatabaseEvent::PermissionsCreate => "permissions_create",
            DatabaseEvent::PermissionsRead => "permissions_read",
            DatabaseEvent::PermissionsUpdate => "permissions_update",
            DatabaseEvent::PermissionsDelete => "permissions_delete",
            DatabaseEvent::DocumentCreate => "document_create",
            DatabaseEvent::DocumentRead => "document_read",
            DatabaseEvent::DocumentFind => "document_find",
            DatabaseEvent::DocumentUpdate => "document_update",
            DatabaseEvent::DocumentDelete => "document_delete",
            DatabaseEvent::DocumentCount => "document_count",
            DatabaseEvent::DocumentSum => "document_sum",
            DatabaseEvent::DocumentIncrease => "document_increase",
            DatabaseEvent::DocumentDecrease => "document_decrease",
            DatabaseEvent::DocumentPurge => "document_purge",
            DatabaseEvent::DocumentsCreate => "documents_create",
            DatabaseEvent::DocumentsUpdate => "documents_update",
            DatabaseEvent::DocumentsDelete => "documents_delete",
        }
    }
}

impl fmt::Display for DatabaseEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        assert_eq!(DatabaseEvent::DocumentCreate.as_str(), "document_create");
        assert_eq!(DatabaseEvent::IndexRename.as_str(), "index_rename");
        assert_eq!(DatabaseEvent::DocumentsUpdate.as_str(), "documents_update");
    }
}
