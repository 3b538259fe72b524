//! # Remote Workbook Client
//!
//! Thin typed wrapper over the drive and workbook endpoints of the remote
//! document service. Every call goes through the [`RetryingTransport`].

use crate::config::DocumentLocation;
use crate::config::LocationKind;
use crate::config::RequestContext;
use crate::error::SheetMarkerError;
use crate::spreadsheet::reference::CellRange;
use crate::spreadsheet::snapshot::UsedRangeSnapshot;
use crate::spreadsheet::value::CellValue;
use crate::transport::Method;
use crate::transport::RemoteResponse;
use crate::transport::RequestBody;
use crate::transport::RetryingTransport;
use serde::Deserialize;
use serde_json::json;
use url::Url;

/// What the service does when an uploaded file name already exists.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ConflictBehavior {
    #[default]
    Fail,
    Replace,
    Rename,
}

impl ConflictBehavior {
    fn as_str(&self) -> &'static str {
        match self {
            ConflictBehavior::Fail => "fail",
            ConflictBehavior::Replace => "replace",
            ConflictBehavior::Rename => "rename",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveItem {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub web_url: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct WorksheetInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub position: u32,
}

#[derive(Deserialize)]
struct Collection<T> {
    value: Vec<T>,
}

pub struct GraphClient {
    transport: RetryingTransport,
}

impl GraphClient {
    pub fn new(transport: RetryingTransport) -> Self {
        GraphClient { transport }
    }

    /// Resolves the stable item id of a document from its drive path.
    pub fn resolve_item(&self, context: &RequestContext, location: &DocumentLocation) -> Result<DriveItem, SheetMarkerError> {
        let url = self.path_url(location, None)?;
        let response = self.transport.execute(context, Method::Get, &url, &[200], None)?;
        response.json()
    }

    /// Lists the worksheets of a workbook item in tab order.
    pub fn worksheets(&self, context: &RequestContext, location: &DocumentLocation, item_id: &str) -> Result<Vec<WorksheetInfo>, SheetMarkerError> {
        let url = self.item_url(location, item_id, &["workbook", "worksheets"])?;
        let response = self.transport.execute(context, Method::Get, &url, &[200], None)?;
        let mut sheets = response.json::<Collection<WorksheetInfo>>()?.value;
        sheets.sort_by_key(|sheet| sheet.position);
        Ok(sheets)
    }

    pub fn used_range(
        &self,
        context: &RequestContext,
        location: &DocumentLocation,
        item_id: &str,
        worksheet_id: &str,
    ) -> Result<UsedRangeSnapshot, SheetMarkerError> {
        let url = self.item_url(location, item_id, &["workbook", "worksheets", worksheet_id, "usedRange"])?;
        let response = self.transport.execute(context, Method::Get, &url, &[200], None)?;
        response.json()
    }

    /// Overwrites a rectangular range; `address` is local to the worksheet.
    pub fn write_range(
        &self,
        context: &RequestContext,
        location: &DocumentLocation,
        item_id: &str,
        worksheet_id: &str,
        address: &str,
        values: &[Vec<CellValue>],
    ) -> Result<RemoteResponse, SheetMarkerError> {
        let url = self.range_url(location, item_id, worksheet_id, address, None)?;
        let body = RequestBody::Json(json!({ "values": values }));
        Ok(self.transport.execute(context, Method::Patch, &url, &[200], Some(body))?)
    }

    /// Inserts one blank row before `row`, shifting the rows below down.
    pub fn insert_row(
        &self,
        context: &RequestContext,
        location: &DocumentLocation,
        item_id: &str,
        worksheet_id: &str,
        row: u32,
    ) -> Result<RemoteResponse, SheetMarkerError> {
        let url = self.range_url(location, item_id, worksheet_id, &format!("{row}:{row}"), Some("insert"))?;
        let body = RequestBody::Json(json!({ "shift": "Down" }));
        Ok(self.transport.execute(context, Method::Post, &url, &[200, 201], Some(body))?)
    }

    pub fn merge(
        &self,
        context: &RequestContext,
        location: &DocumentLocation,
        item_id: &str,
        worksheet_id: &str,
        range: &CellRange,
    ) -> Result<RemoteResponse, SheetMarkerError> {
        let url = self.range_url(location, item_id, worksheet_id, &range.to_string(), Some("merge"))?;
        let body = RequestBody::Json(json!({ "across": false }));
        Ok(self.transport.execute(context, Method::Post, &url, &[200, 204], Some(body))?)
    }

    /// Downloads the raw bytes of a stored document.
    pub fn download(&self, context: &RequestContext, location: &DocumentLocation) -> Result<Vec<u8>, SheetMarkerError> {
        let url = self.path_url(location, Some("content"))?;
        let response = self.transport.execute(context, Method::Get, &url, &[200], None)?;
        Ok(response.body)
    }

    /// Stores a document at `location`, resolving name clashes with `conflict`.
    pub fn upload(
        &self,
        context: &RequestContext,
        location: &DocumentLocation,
        bytes: Vec<u8>,
        conflict: ConflictBehavior,
    ) -> Result<DriveItem, SheetMarkerError> {
        let mut url = Url::parse(&self.path_url(location, Some("content"))?)?;
        url.query_pairs_mut().append_pair("@microsoft.graph.conflictBehavior", conflict.as_str());
        let response = self.transport.execute(context, Method::Put, url.as_str(), &[200, 201], Some(RequestBody::Bytes(bytes)))?;
        response.json()
    }

    fn drive_segments(location: &DocumentLocation) -> Vec<&str> {
        match &location.kind {
            LocationKind::Drive(id) => vec!["drives", id.as_str()],
            LocationKind::User(id) => vec!["users", id.as_str(), "drive"],
        }
    }

    /// `{drive}/root:/{path}` or `{drive}/root:/{path}:/{action}`.
    fn path_url(&self, location: &DocumentLocation, action: Option<&str>) -> Result<String, SheetMarkerError> {
        let mut parts: Vec<String> = location.path
            .split(['/', '\\'])
            .filter(|part| !part.is_empty())
            .map(str::to_owned)
            .collect();
        if parts.is_empty() {
            Err(SheetMarkerError::WithContextError(format!("Document path '{}' is empty", location.path)))?;
        }
        let mut segments = GraphClient::drive_segments(location);
        segments.push("root:");
        if let Some(action) = action {
            if let Some(last) = parts.last_mut() {
                last.push(':');
            }
            parts.push(action.to_owned());
        }
        segments.extend(parts.iter().map(String::as_str));
        self.build_url(&segments)
    }

    fn item_url(&self, location: &DocumentLocation, item_id: &str, tail: &[&str]) -> Result<String, SheetMarkerError> {
        let mut segments = GraphClient::drive_segments(location);
        segments.extend(["items", item_id]);
        segments.extend(tail);
        self.build_url(&segments)
    }

    fn range_url(
        &self,
        location: &DocumentLocation,
        item_id: &str,
        worksheet_id: &str,
        address: &str,
        action: Option<&str>,
    ) -> Result<String, SheetMarkerError> {
        let range = format!("range(address='{address}')");
        let mut tail = vec!["workbook", "worksheets", worksheet_id, range.as_str()];
        tail.extend(action);
        self.item_url(location, item_id, &tail)
    }

    fn build_url(&self, segments: &[&str]) -> Result<String, SheetMarkerError> {
        let mut url = Url::parse(&self.transport.config().graph_url)?;
        url.path_segments_mut()
            .map_err(|_| SheetMarkerError::WithContextError(format!("Service URL '{}' cannot be a base", self.transport.config().graph_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url.into())
    }
}
