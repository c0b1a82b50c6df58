//! Shared behavior of the two list-shaped namespaces.
//!
//! Checklists and templates are stored, ordered, resolved and replicated the
//! same way; `Record` lets the store and sync engine treat them generically.

use crate::conflict::Versioned;
use crate::model::{Checklist, Item, Namespace, Template, Timestamp};
use crate::order::OrderList;
use crate::remote::{RemoteRow, Table};
use crate::serializer;
use crate::store::LocalData;

use std::collections::BTreeMap;

pub trait Record: Versioned + Clone + Send + Sync + 'static {
    const NAMESPACE: Namespace;
    const TABLE: Table;

    /// Primary key within the namespace.
    fn key(&self) -> &str;

    /// Name shown to the user (checklist title, template name).
    fn display_name(&self) -> &str;

    fn items(&self) -> &[Item];

    fn set_last_modified(&mut self, at: Timestamp);

    fn set_synced(&mut self, synced: bool);

    /// Legacy flat-text content awaiting migration.
    fn legacy_content(&mut self) -> &mut Option<String>;

    /// Apply a decoded legacy record. Only fills in a missing display name.
    fn adopt_decoded(&mut self, title: Option<String>, items: Vec<Item>);

    /// Build a synced local record from a remote row.
    fn from_row(row: &RemoteRow) -> Self;

    fn records(data: &LocalData) -> &BTreeMap<String, Self>;

    fn records_mut(data: &mut LocalData) -> &mut BTreeMap<String, Self>;

    fn order(data: &LocalData) -> &OrderList;

    fn order_mut(data: &mut LocalData) -> &mut OrderList;

    /// Encode for the remote store.
    fn to_row(&self) -> RemoteRow {
        RemoteRow {
            name: self.key().to_string(),
            content: serializer::encode(self.display_name(), self.items()),
            last_modified: self.last_modified(),
        }
    }
}

impl Record for Checklist {
    const NAMESPACE: Namespace = Namespace::Checklists;
    const TABLE: Table = Table::Checklists;

    fn key(&self) -> &str {
        &self.name
    }

    fn display_name(&self) -> &str {
        if self.title.is_empty() { &self.name } else { &self.title }
    }

    fn items(&self) -> &[Item] {
        &self.items
    }

    fn set_last_modified(&mut self, at: Timestamp) {
        self.last_modified = at;
    }

    fn set_synced(&mut self, synced: bool) {
        self.synced = synced;
    }

    fn legacy_content(&mut self) -> &mut Option<String> {
        &mut self.content
    }

    fn adopt_decoded(&mut self, title: Option<String>, items: Vec<Item>) {
        if self.title.is_empty() {
            self.title = title.unwrap_or_else(|| self.name.clone());
        }
        self.items = items;
    }

    fn from_row(row: &RemoteRow) -> Self {
        let decoded = serializer::decode(&row.content);
        Self {
            name: row.name.clone(),
            title: decoded.title.unwrap_or_else(|| row.name.clone()),
            items: decoded.items,
            last_modified: row.last_modified,
            synced: true,
            content: None,
        }
    }

    fn records(data: &LocalData) -> &BTreeMap<String, Self> {
        &data.checklists
    }

    fn records_mut(data: &mut LocalData) -> &mut BTreeMap<String, Self> {
        &mut data.checklists
    }

    fn order(data: &LocalData) -> &OrderList {
        &data.checklist_order
    }

    fn order_mut(data: &mut LocalData) -> &mut OrderList {
        &mut data.checklist_order
    }
}

impl Record for Template {
    const NAMESPACE: Namespace = Namespace::Templates;
    const TABLE: Table = Table::Templates;

    fn key(&self) -> &str {
        &self.id
    }

    fn display_name(&self) -> &str {
        &self.name
    }

    fn items(&self) -> &[Item] {
        &self.items
    }

    fn set_last_modified(&mut self, at: Timestamp) {
        self.last_modified = at;
    }

    fn set_synced(&mut self, synced: bool) {
        self.synced = synced;
    }

    fn legacy_content(&mut self) -> &mut Option<String> {
        &mut self.content
    }

    fn adopt_decoded(&mut self, title: Option<String>, items: Vec<Item>) {
        if self.name.is_empty() {
            self.name = title.unwrap_or_default();
        }
        self.items = items;
    }

    fn from_row(row: &RemoteRow) -> Self {
        let decoded = serializer::decode(&row.content);
        Self {
            id: row.name.clone(),
            name: decoded.title.unwrap_or_default(),
            items: decoded.items,
            last_modified: row.last_modified,
            synced: true,
            content: None,
        }
    }

    fn records(data: &LocalData) -> &BTreeMap<String, Self> {
        &data.templates
    }

    fn records_mut(data: &mut LocalData) -> &mut BTreeMap<String, Self> {
        &mut data.templates
    }

    fn order(data: &LocalData) -> &OrderList {
        &data.template_order
    }

    fn order_mut(data: &mut LocalData) -> &mut OrderList {
        &mut data.template_order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{same_items, Priority};

    #[test]
    fn test_checklist_row_roundtrip() {
        let mut list = Checklist::new(
            "groceries",
            "Groceries",
            vec![Item::new("Milk", Priority::DEFAULT, false)],
        );
        list.last_modified = 77;

        let row = list.to_row();
        assert_eq!(row.name, "groceries");
        assert_eq!(row.last_modified, 77);

        let back = Checklist::from_row(&row);
        assert_eq!(back.name, "groceries");
        assert_eq!(back.title, "Groceries");
        assert!(back.synced);
        assert!(same_items(&back.items, &list.items));
    }

    #[test]
    fn test_template_row_keys_by_id() {
        let template = Template::new("Packing", vec![Item::new("Socks", Priority::MAX, false)]);
        let row = template.to_row();
        assert_eq!(row.name, template.id);

        let back = Template::from_row(&row);
        assert_eq!(back.id, template.id);
        assert_eq!(back.name, "Packing");
    }

    #[test]
    fn test_checklist_display_name_falls_back_to_name() {
        let list = Checklist::new("inbox", "", vec![]);
        assert_eq!(list.display_name(), "inbox");
    }
}
