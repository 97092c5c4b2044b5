//! Row and column semantics of the virtualised table
//!
//! The table renders structural rows next to the data: a sticky `header`
//! row and `buffer` rows that reserve scroll space for off-screen data.
//! Every enumeration here skips those unless asked for them explicitly.

use std::fmt;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::HarnessConfig;
use crate::driver::{Locator, LocatorRef, MouseButton, Page, TextMatch, WaitState};
use crate::error::{E2eError, E2eResult};

/// DOM contract of the table widget
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TableSelectors {
    /// Element hovered to reveal the filter control
    pub host: String,
    pub body_test_id: String,
    pub header_test_id: String,
    pub row: String,
    pub header_cell: String,
    pub header_class: String,
    pub buffer_class: String,
    pub selected_class: String,
    pub global_filter: String,
    pub filter_input: String,
    pub context_menu: String,
    pub menu_option: String,
    /// Key held while clicking to extend the selection
    pub multi_select_key: String,
}

impl Default for TableSelectors {
    fn default() -> Self {
        Self {
            host: "dma-cc-table".to_string(),
            body_test_id: "virtualised-table.body".to_string(),
            header_test_id: "virtualised-table.header".to_string(),
            row: "tr".to_string(),
            header_cell: "th".to_string(),
            header_class: "header".to_string(),
            buffer_class: "buffer".to_string(),
            selected_class: "selected".to_string(),
            global_filter: ".global-filter".to_string(),
            filter_input: "input".to_string(),
            context_menu: "dma-cc-context-menu".to_string(),
            menu_option: ".option".to_string(),
            multi_select_key: "Control".to_string(),
        }
    }
}

impl TableSelectors {
    /// `tr:not(.buffer):not(.header)`
    pub fn data_row(&self) -> String {
        format!(
            "{}:not(.{}):not(.{})",
            self.row, self.buffer_class, self.header_class
        )
    }
}

/// Why a row was rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowKind {
    Data,
    Header,
    Buffer,
}

impl RowKind {
    /// Classify a row from its `class` attribute
    pub fn from_classes(classes: &str, selectors: &TableSelectors) -> Self {
        let mut kind = RowKind::Data;
        for class in classes.split_whitespace() {
            if class == selectors.header_class {
                return RowKind::Header;
            }
            if class == selectors.buffer_class {
                kind = RowKind::Buffer;
            }
        }
        kind
    }

    pub async fn of(row: &dyn Locator, selectors: &TableSelectors) -> E2eResult<Self> {
        let classes = row.get_attribute("class").await?.unwrap_or_default();
        Ok(Self::from_classes(&classes, selectors))
    }
}

/// Which rows `select` acts on
#[derive(Debug, Clone)]
pub enum RowCriterion {
    /// Every data row containing the text, in DOM order
    Text(String),
    /// Every data row whose text matches, in DOM order
    Pattern(Regex),
    /// Exactly one row per entry, matched by exact cell text, in list order
    Ordered(Vec<String>),
}

impl From<&str> for RowCriterion {
    fn from(s: &str) -> Self {
        RowCriterion::Text(s.to_string())
    }
}

impl From<String> for RowCriterion {
    fn from(s: String) -> Self {
        RowCriterion::Text(s)
    }
}

impl From<Regex> for RowCriterion {
    fn from(re: Regex) -> Self {
        RowCriterion::Pattern(re)
    }
}

impl From<Vec<String>> for RowCriterion {
    fn from(values: Vec<String>) -> Self {
        RowCriterion::Ordered(values)
    }
}

impl From<&[&str]> for RowCriterion {
    fn from(values: &[&str]) -> Self {
        RowCriterion::Ordered(values.iter().map(|v| v.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for RowCriterion {
    fn from(values: [&str; N]) -> Self {
        RowCriterion::Ordered(values.iter().map(|v| v.to_string()).collect())
    }
}

/// Context menu entry, by position or by label
#[derive(Debug, Clone)]
pub enum MenuOption {
    Index(usize),
    Text(TextMatch),
}

impl fmt::Display for MenuOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MenuOption::Index(i) => write!(f, "option #{}", i),
            MenuOption::Text(t) => write!(f, "option {}", t),
        }
    }
}

impl From<usize> for MenuOption {
    fn from(i: usize) -> Self {
        MenuOption::Index(i)
    }
}

impl From<&str> for MenuOption {
    fn from(s: &str) -> Self {
        MenuOption::Text(TextMatch::from(s))
    }
}

impl From<Regex> for MenuOption {
    fn from(re: Regex) -> Self {
        MenuOption::Text(TextMatch::Pattern(re))
    }
}

/// Semantic operations over the table widget
#[derive(Debug, Clone)]
pub struct TableInteractor {
    selectors: TableSelectors,
    visibility_timeout: Duration,
}

impl Default for TableInteractor {
    fn default() -> Self {
        Self::new(&HarnessConfig::default())
    }
}

impl TableInteractor {
    pub fn new(config: &HarnessConfig) -> Self {
        Self {
            selectors: config.table.clone(),
            visibility_timeout: config.timeouts.visibility(),
        }
    }

    pub fn selectors(&self) -> &TableSelectors {
        &self.selectors
    }

    /// Set the global filter, or clear it when `value` is `None` or empty
    pub async fn filter(&self, page: &dyn Page, value: Option<&str>) -> E2eResult<()> {
        let control = page.locator(&self.selectors.global_filter);

        // The control only renders while the table is hovered
        page.locator(&self.selectors.host).hover().await?;
        control
            .wait_for(WaitState::Visible, self.visibility_timeout)
            .await?;
        control.click(MouseButton::Left).await?;

        let input = control.locator(&self.selectors.filter_input);
        match value {
            Some(v) if !v.is_empty() => {
                info!("Filtering table by {:?}", v);
                input.fill(v).await
            }
            _ => {
                info!("Clearing table filter");
                input.clear().await
            }
        }
    }

    /// Click the rows picked by `criterion` and return them in click order
    pub async fn select(
        &self,
        page: &dyn Page,
        criterion: impl Into<RowCriterion>,
    ) -> E2eResult<Vec<LocatorRef>> {
        let rows = match criterion.into() {
            RowCriterion::Ordered(values) => self.resolve_ordered(page, &values).await?,
            RowCriterion::Text(text) => self.find(page, TextMatch::Contains(text)).await?,
            RowCriterion::Pattern(re) => self.find(page, TextMatch::Pattern(re)).await?,
        };
        self.click_rows(page, &rows).await?;
        Ok(rows)
    }

    async fn resolve_ordered(
        &self,
        page: &dyn Page,
        values: &[String],
    ) -> E2eResult<Vec<LocatorRef>> {
        let mut rows = Vec::with_capacity(values.len());
        for (i, value) in values.iter().enumerate() {
            let target = format!("row {:?}", value);
            // A second click with the modifier held would deselect the row
            if values[..i].contains(value) {
                return Err(E2eError::resolution(target, "listed more than once"));
            }
            let row = self.get_rows(page, Some(TextMatch::Exact(value.clone())));
            match row.count().await? {
                1 => rows.push(row),
                0 => return Err(E2eError::resolution(target, "no row has this text")),
                n => {
                    return Err(E2eError::resolution(
                        target,
                        format!("{} rows have this text", n),
                    ))
                }
            }
        }
        Ok(rows)
    }

    /// Click each row; hold the multi-select key when there is more than one.
    async fn click_rows(&self, page: &dyn Page, rows: &[LocatorRef]) -> E2eResult<()> {
        let multiple = rows.len() > 1;
        let key = &self.selectors.multi_select_key;
        debug!("Selecting {} row(s)", rows.len());

        if multiple {
            page.key_down(key).await?;
        }

        let mut clicked = Ok(());
        for row in rows {
            if let Err(e) = row.click(MouseButton::Left).await {
                clicked = Err(e);
                break;
            }
        }

        // Released even when a click failed
        let released = if multiple {
            page.key_up(key).await
        } else {
            Ok(())
        };
        clicked.and(released)
    }

    /// Lazy query over data rows of the table body
    pub fn get_rows(&self, page: &dyn Page, filter: Option<TextMatch>) -> LocatorRef {
        let rows = page
            .get_by_test_id(&self.selectors.body_test_id)
            .locator(&self.selectors.data_row());
        match filter {
            Some(filter) => rows.filter(filter),
            None => rows,
        }
    }

    pub async fn get_rows_array(&self, page: &dyn Page) -> E2eResult<Vec<LocatorRef>> {
        self.get_rows(page, None).all().await
    }

    /// Data rows matching `value`, without clicking anything
    pub async fn find(
        &self,
        page: &dyn Page,
        value: impl Into<TextMatch>,
    ) -> E2eResult<Vec<LocatorRef>> {
        self.get_rows(page, Some(value.into())).all().await
    }

    /// Body rows of the requested kinds, in DOM order
    pub async fn rows_of_kinds(
        &self,
        page: &dyn Page,
        kinds: &[RowKind],
    ) -> E2eResult<Vec<LocatorRef>> {
        let all = page
            .get_by_test_id(&self.selectors.body_test_id)
            .locator(&self.selectors.row)
            .all()
            .await?;

        let mut rows = Vec::new();
        for row in all {
            if kinds.contains(&RowKind::of(row.as_ref(), &self.selectors).await?) {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    /// Header cell whose text matches `name`
    pub fn get_column(&self, page: &dyn Page, name: impl Into<TextMatch>) -> LocatorRef {
        page.get_by_test_id(&self.selectors.header_test_id)
            .locator(&self.selectors.header_cell)
            .filter(name.into())
    }

    /// Right-click a column header, pick a menu option, and return the menu
    pub async fn context_column(
        &self,
        page: &dyn Page,
        column: impl Into<TextMatch>,
        option: impl Into<MenuOption>,
    ) -> E2eResult<LocatorRef> {
        let column = column.into();
        let option = option.into();
        let header = self.get_column(page, column.clone());
        ensure_unique(header.as_ref(), &format!("column {}", column)).await?;
        header.click(MouseButton::Right).await?;

        let menu = page.locator(&self.selectors.context_menu);
        menu.wait_for(WaitState::Visible, self.visibility_timeout)
            .await?;

        let options = menu.locator(&self.selectors.menu_option);
        let entry = match &option {
            MenuOption::Index(i) => {
                let available = options.count().await?;
                if *i >= available {
                    return Err(E2eError::resolution(
                        option.to_string(),
                        format!("menu has {} options", available),
                    ));
                }
                options.nth(*i)
            }
            MenuOption::Text(text) => {
                let entry = options.filter(text.clone());
                ensure_unique(entry.as_ref(), &option.to_string()).await?;
                entry
            }
        };

        info!("Column {}: choosing {}", column, option);
        entry.click(MouseButton::Left).await?;
        Ok(menu)
    }
}

async fn ensure_unique(locator: &dyn Locator, target: &str) -> E2eResult<()> {
    match locator.count().await? {
        1 => Ok(()),
        0 => Err(E2eError::resolution(target, "nothing matches")),
        n => Err(E2eError::resolution(target, format!("{} elements match", n))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_row_selector() {
        assert_eq!(
            TableSelectors::default().data_row(),
            "tr:not(.buffer):not(.header)"
        );
    }

    #[test]
    fn test_row_kind_from_classes() {
        let s = TableSelectors::default();
        assert_eq!(RowKind::from_classes("", &s), RowKind::Data);
        assert_eq!(RowKind::from_classes("selected", &s), RowKind::Data);
        assert_eq!(RowKind::from_classes("buffer", &s), RowKind::Buffer);
        assert_eq!(RowKind::from_classes("sticky header", &s), RowKind::Header);
        assert_eq!(RowKind::from_classes("headers", &s), RowKind::Data);
    }

    #[test]
    fn test_criterion_variants() {
        assert!(matches!(RowCriterion::from("Paid"), RowCriterion::Text(_)));
        assert!(matches!(
            RowCriterion::from(Regex::new("Paid").unwrap()),
            RowCriterion::Pattern(_)
        ));
        match RowCriterion::from(["a.cy.ts", "b.cy.ts"]) {
            RowCriterion::Ordered(v) => assert_eq!(v, vec!["a.cy.ts", "b.cy.ts"]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_menu_option_variants() {
        assert!(matches!(MenuOption::from(2usize), MenuOption::Index(2)));
        assert_eq!(MenuOption::from("Filter").to_string(), "option \"Filter\"");
    }

    #[tokio::test]
    async fn test_modifier_released_when_a_click_fails() {
        use crate::sim::{KeyEvent, SimContext, TableFixture};

        let context = SimContext::new();
        let page = context.open_table("https://app.test/", TableFixture::numbered(3));
        let table = TableInteractor::default();
        let rows = vec![
            table.get_rows(&page, None).nth(0),
            page.locator("tr.missing"),
            table.get_rows(&page, None).nth(2),
        ];

        let err = table.click_rows(&page, &rows).await.unwrap_err();
        assert!(matches!(err, E2eError::Resolution { .. }));
        assert_eq!(
            page.key_log(),
            vec![KeyEvent::Down("Control".into()), KeyEvent::Up("Control".into())]
        );
        assert!(page.held_keys().is_empty());
        assert_eq!(page.locator("tr.selected").count().await.unwrap(), 1);
    }
}
