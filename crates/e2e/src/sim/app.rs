//! The virtualised table widget, rendered into a [`Dom`]

use std::collections::BTreeSet;

use serde_json::{json, Value};

use super::dom::{Dom, NodeId};
use crate::driver::MouseButton;
use crate::error::{E2eError, E2eResult};

/// Key that extends the selection instead of replacing it
pub const MULTI_SELECT_KEY: &str = "Control";

/// Options offered by the column context menu, in display order
pub const MENU_OPTIONS: [&str; 4] = ["Sort ascending", "Sort descending", "Filter", "Hide column"];

/// Data shown by a simulated table page
#[derive(Debug, Clone, Default)]
pub struct TableFixture {
    pub columns: Vec<String>,
    pub rows: Vec<FixtureRow>,
}

#[derive(Debug, Clone, Default)]
pub struct FixtureRow {
    pub cells: Vec<String>,
    /// Opened in a new tab when one of the row's cells is clicked
    pub link: Option<String>,
}

impl TableFixture {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn row<I, S>(mut self, cells: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rows.push(FixtureRow {
            cells: cells.into_iter().map(Into::into).collect(),
            link: None,
        });
        self
    }

    pub fn linked_row<I, S>(mut self, cells: I, link: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rows.push(FixtureRow {
            cells: cells.into_iter().map(Into::into).collect(),
            link: Some(link.into()),
        });
        self
    }

    /// `n` rows of `["001", "row-001", "Passed" | "Failed"]`
    pub fn numbered(n: usize) -> Self {
        (1..=n).fold(Self::new(["#", "Name", "Status"]), |fixture, i| {
            let status = if i % 2 == 0 { "Failed" } else { "Passed" };
            fixture.row([format!("{:03}", i), format!("row-{:03}", i), status.to_string()])
        })
    }
}

/// What a table interaction asks of the surrounding page
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Effect {
    None,
    /// The visible rows changed and the app re-queried the server
    Requery,
    OpenTab(String),
}

/// A column menu option that was clicked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuChoice {
    pub column: String,
    pub option: String,
}

#[derive(Debug)]
pub(crate) struct TableApp {
    fixture: TableFixture,
    filter: String,
    selected: BTreeSet<usize>,
    menu_column: Option<String>,
    choices: Vec<MenuChoice>,
    host: NodeId,
    filter_control: NodeId,
    input: NodeId,
    header_region: NodeId,
    body: NodeId,
    menu: NodeId,
}

impl TableApp {
    /// Build the widget under the document root and render the rows
    pub fn mount(dom: &mut Dom, fixture: TableFixture) -> Self {
        let root = dom.root();
        let application = dom.append(root, "dma-application");

        let host = dom.append(application, "dma-cc-table");
        let filter_control = dom.append(host, "div");
        dom.add_class(filter_control, "global-filter");
        dom.set_hidden(filter_control, true);
        let input = dom.append(filter_control, "input");
        dom.set_attr(input, "value", "");

        let container = dom.append(host, "div");
        dom.add_class(container, "table-container");

        let header_table = dom.append(container, "table");
        dom.set_attr(header_table, "data-testid", "virtualised-table.header");
        let thead = dom.append(header_table, "thead");
        let header_region = dom.append(thead, "tr");
        dom.add_class(header_region, "header");
        for column in &fixture.columns {
            dom.append_text(header_region, "th", column);
        }

        let body_table = dom.append(container, "table");
        dom.set_attr(body_table, "data-testid", "virtualised-table.body");
        let body = dom.append(body_table, "tbody");

        let menu = dom.append(application, "dma-cc-context-menu");
        dom.set_hidden(menu, true);
        for option in MENU_OPTIONS {
            let entry = dom.append_text(menu, "div", option);
            dom.add_class(entry, "option");
        }

        let app = Self {
            fixture,
            filter: String::new(),
            selected: BTreeSet::new(),
            menu_column: None,
            choices: Vec::new(),
            host,
            filter_control,
            input,
            header_region,
            body,
            menu,
        };
        app.render(dom);
        app
    }

    fn visible_rows(&self) -> Vec<usize> {
        let needle = self.filter.to_lowercase();
        self.fixture
            .rows
            .iter()
            .enumerate()
            .filter(|(_, row)| {
                needle.is_empty() || row.cells.iter().any(|c| c.to_lowercase().contains(&needle))
            })
            .map(|(i, _)| i)
            .collect()
    }

    fn render(&self, dom: &mut Dom) {
        dom.clear_children(self.body);

        let sticky = dom.append(self.body, "tr");
        dom.add_class(sticky, "header");
        for column in &self.fixture.columns {
            dom.append_text(sticky, "th", column);
        }

        let top = dom.append(self.body, "tr");
        dom.add_class(top, "buffer");

        for index in self.visible_rows() {
            let tr = dom.append(self.body, "tr");
            dom.set_attr(tr, "data-row", &index.to_string());
            if self.selected.contains(&index) {
                dom.add_class(tr, "selected");
            }
            for cell in &self.fixture.rows[index].cells {
                dom.append_text(tr, "td", cell);
            }
        }

        let bottom = dom.append(self.body, "tr");
        dom.add_class(bottom, "buffer");
    }

    /// Payload of the `GetNextQuerySessionPage` response for the current view
    pub fn query_page(&self) -> Value {
        let rows: Vec<&Vec<String>> = self
            .visible_rows()
            .into_iter()
            .map(|i| &self.fixture.rows[i].cells)
            .collect();
        json!({ "d": { "Rows": rows, "TotalCount": rows.len() } })
    }

    pub fn choices(&self) -> &[MenuChoice] {
        &self.choices
    }

    pub fn hover(&mut self, dom: &mut Dom, node: NodeId) {
        if dom.is_within(node, self.host) {
            dom.set_hidden(self.filter_control, false);
        } else if self.filter.is_empty() {
            dom.set_hidden(self.filter_control, true);
        }
    }

    pub fn click(
        &mut self,
        dom: &mut Dom,
        node: NodeId,
        button: MouseButton,
        extend: bool,
    ) -> Effect {
        if dom.is_within(node, self.menu) {
            if let (Some(option), Some(column)) = (
                dom.closest(node, |n| dom.has_class(n, "option")),
                self.menu_column.clone(),
            ) {
                self.choices.push(MenuChoice {
                    column,
                    option: dom.text_content(option),
                });
            }
            return Effect::None;
        }
        dom.set_hidden(self.menu, true);

        if button == MouseButton::Right {
            if dom.is_within(node, self.header_region) && dom.tag(node) == "th" {
                self.menu_column = Some(dom.text_content(node));
                dom.set_hidden(self.menu, false);
            }
            return Effect::None;
        }

        let is_data_row = |n: NodeId| dom.tag(n) == "tr" && dom.attr(n, "data-row").is_some();
        let Some(row) = dom.closest(node, is_data_row) else {
            return Effect::None;
        };
        let Some(index) = dom.attr(row, "data-row").and_then(|v| v.parse::<usize>().ok()) else {
            return Effect::None;
        };

        if extend {
            if !self.selected.remove(&index) {
                self.selected.insert(index);
            }
        } else {
            self.selected = BTreeSet::from([index]);
        }
        let on_cell = dom.tag(node) == "td";
        let link = self.fixture.rows[index].link.clone();
        self.render(dom);

        match link {
            Some(url) if on_cell => Effect::OpenTab(url),
            _ => Effect::None,
        }
    }

    pub fn fill(&mut self, dom: &mut Dom, node: NodeId, value: &str) -> E2eResult<Effect> {
        if dom.tag(node) != "input" {
            return Err(E2eError::Driver(format!(
                "cannot fill <{}>: not an input",
                dom.tag(node)
            )));
        }
        dom.set_attr(node, "value", value);
        if node != self.input {
            return Ok(Effect::None);
        }

        self.filter = value.to_string();
        self.render(dom);
        Ok(Effect::Requery)
    }
}
