//! ECMWF open-data client and the `ecmwf_download` tool
//!
//! Files live at
//! `{root}/{date}/{hh}z/{model}/{resol}/{stream}/{date}{hh}0000-{step}-{stream}-{type}.{format}`.
//! GRIB2 products also have a `.index` sibling used for single-parameter
//! downloads.

use agentbench_core::{require_i64, require_str, Error, Result, Tool, ToolArguments, ToolDefinition};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::RANGE;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

pub const BASE_URL: &str = "https://data.ecmwf.int/forecasts";

pub const VALID_MODELS: &[&str] = &["ifs"];
pub const VALID_RESOLUTIONS: &[&str] = &["0p25"];
pub const VALID_STREAMS: &[&str] = &["oper", "enfo", "waef", "wave", "scda", "scwv", "mmsf"];
pub const VALID_TYPES: &[&str] = &["fc", "ef", "ep", "tf"];
pub const VALID_FORMATS: &[&str] = &["grib2", "bufr"];
pub const VALID_HOURS: &[&str] = &["00", "06", "12", "18"];

/// One product on the open-data server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForecastFile<'a> {
    /// `YYYYMMDD`
    pub date: &'a str,
    pub hh: &'a str,
    pub model: &'a str,
    pub resol: &'a str,
    pub stream: &'a str,
    /// e.g. `24h`
    pub step: &'a str,
    pub file_type: &'a str,
    pub file_format: &'a str,
}

impl ForecastFile<'_> {
    pub fn file_name(&self) -> String {
        format!(
            "{}{}0000-{}-{}-{}.{}",
            self.date, self.hh, self.step, self.stream, self.file_type, self.file_format
        )
    }

    fn validate(&self) -> Result<()> {
        check("model", self.model, VALID_MODELS)?;
        check("resolution", self.resol, VALID_RESOLUTIONS)?;
        check("stream", self.stream, VALID_STREAMS)?;
        check("type", self.file_type, VALID_TYPES)?;
        check("format", self.file_format, VALID_FORMATS)?;
        check("forecast hour", self.hh, VALID_HOURS)
    }
}

fn check(what: &str, value: &str, allowed: &[&str]) -> Result<()> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(Error::invalid_argument(format!(
            "Invalid {} '{}'. Only allowed: {:?}",
            what, value, allowed
        ))
        .with_operation("ecmwf::validate"))
    }
}

/// HTTP client for the ECMWF open-data server
#[derive(Debug, Clone)]
pub struct EcmwfClient {
    root_url: String,
    client: Client,
}

impl Default for EcmwfClient {
    fn default() -> Self {
        Self::new()
    }
}

impl EcmwfClient {
    pub fn new() -> Self {
        Self::with_root_url(BASE_URL)
    }

    pub fn with_root_url(root_url: impl Into<String>) -> Self {
        Self {
            root_url: root_url.into().trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    pub fn root_url(&self) -> &str {
        &self.root_url
    }

    /// Validate every component and build the product URL.
    pub fn build_file_url(&self, file: &ForecastFile<'_>) -> Result<String> {
        file.validate()?;
        Ok(format!(
            "{}/{}/{}z/{}/{}/{}/{}",
            self.root_url,
            file.date,
            file.hh,
            file.model,
            file.resol,
            file.stream,
            file.file_name()
        ))
    }

    /// Stream `url` to `save_path`, returning the number of bytes written.
    /// A partially written file is removed on failure.
    pub async fn download_file(&self, url: &str, save_path: &Path) -> Result<u64> {
        let response = self.get(url, None, "ecmwf::download_file").await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(status_error("Failed to download file", status, url)
                .with_operation("ecmwf::download_file"));
        }
        save_body(response, save_path).await
    }

    /// Download a single GRIB2 message of a product. The product's `.index`
    /// file (JSON lines with `param`, `_offset` and `_length`) locates the
    /// first message for `param`, which is then fetched with a byte range.
    pub async fn download_field(
        &self,
        index_url: &str,
        grib_url: &str,
        param: &str,
        save_path: &Path,
    ) -> Result<u64> {
        let entries = self.fetch_index(index_url).await?;
        let entry = entries
            .iter()
            .find(|e| e.param.as_deref() == Some(param))
            .ok_or_else(|| {
                Error::invalid_argument(format!("Parameter '{}' not found in index file.", param))
                    .with_operation("ecmwf::download_field")
                    .with_context("index", index_url)
            })?;
        if entry.length == 0 {
            return Err(Error::parse_failed(format!(
                "index entry for '{}' has zero length",
                param
            ))
            .with_operation("ecmwf::download_field"));
        }

        let range = format!("bytes={}-{}", entry.offset, entry.offset + entry.length - 1);
        debug!(url = %grib_url, param, range = %range, "downloading field");
        let response = self.get(grib_url, Some(&range), "ecmwf::download_field").await?;

        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::PARTIAL_CONTENT {
            return Err(status_error("Failed to download field", status, grib_url)
                .with_operation("ecmwf::download_field"));
        }
        save_body(response, save_path).await
    }

    /// Download one parameter of a GRIB2 product, e.g. `2t` for 2 m temperature.
    pub async fn download_single_param(
        &self,
        file: &ForecastFile<'_>,
        param: &str,
        save_path: &Path,
    ) -> Result<u64> {
        if file.file_format != "grib2" {
            return Err(Error::invalid_argument(
                "Field-by-field download is only supported for grib2 format.",
            )
            .with_operation("ecmwf::download_single_param"));
        }
        let grib_url = self.build_file_url(file)?;
        let index_url = format!("{}.index", grib_url.trim_end_matches(".grib2"));
        self.download_field(&index_url, &grib_url, param, save_path).await
    }

    async fn fetch_index(&self, index_url: &str) -> Result<Vec<IndexEntry>> {
        let response = self.get(index_url, None, "ecmwf::download_field").await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(status_error("Failed to download index file", status, index_url)
                .with_operation("ecmwf::download_field"));
        }

        let text = response.text().await.map_err(|e| {
            Error::network_failed(format!("Failed to read index file: {}\nURL: {}", e, index_url))
                .with_operation("ecmwf::download_field")
                .set_source(e)
        })?;
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str::<IndexEntry>(line).map_err(|e| {
                    Error::parse_failed(format!("invalid index line: {}", e))
                        .with_operation("ecmwf::download_field")
                        .with_context("index", index_url)
                        .set_source(e)
                })
            })
            .collect()
    }

    async fn get(&self, url: &str, range: Option<&str>, operation: &'static str) -> Result<Response> {
        let mut request = self.client.get(url);
        if let Some(range) = range {
            request = request.header(RANGE, range);
        }
        request.send().await.map_err(|e| {
            Error::network_failed(format!("Failed to download file: {}\nURL: {}", e, url))
                .with_operation(operation)
                .set_source(e)
        })
    }
}

/// One line of a product's `.index` file
#[derive(Debug, Clone, Deserialize)]
struct IndexEntry {
    #[serde(default)]
    param: Option<String>,
    #[serde(rename = "_offset")]
    offset: u64,
    #[serde(rename = "_length")]
    length: u64,
}

fn status_error(what: &str, status: StatusCode, url: &str) -> Error {
    Error::network_failed(format!(
        "{}. Status code: {}\nURL: {}",
        what,
        status.as_u16(),
        url
    ))
    .with_context("status", status.as_u16().to_string())
}

/// Write a response body to disk, removing a partial file on failure
async fn save_body(response: Response, save_path: &Path) -> Result<u64> {
    let result = write_body(response, save_path).await;
    if result.is_err() {
        let _ = tokio::fs::remove_file(save_path).await;
    }
    result
}

async fn write_body(response: Response, save_path: &Path) -> Result<u64> {
    let io_err = |e: std::io::Error| {
        Error::from(e)
            .with_operation("ecmwf::download_file")
            .with_context("path", save_path.display().to_string())
    };

    let mut file = tokio::fs::File::create(save_path).await.map_err(io_err)?;
    let mut written = 0u64;
    let mut body = response.bytes_stream();

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| {
            Error::network_failed(format!("download interrupted: {}", e))
                .with_operation("ecmwf::download_file")
                .set_source(e)
        })?;
        file.write_all(&chunk).await.map_err(io_err)?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(io_err)?;

    Ok(written)
}

/// `ecmwf_download`: fetch one forecast product into the current directory
#[derive(Debug, Clone, Default)]
pub struct EcmwfDownloadTool {
    client: EcmwfClient,
}

impl EcmwfDownloadTool {
    pub fn new(client: EcmwfClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for EcmwfDownloadTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("ecmwf_download", "Downloads a file from the ECMWF server")
            .with_param("year", "int", "Year of the forecast.", true)
            .with_param("month", "int", "Month of the forecast.", true)
            .with_param("day", "int", "Day of the forecast.", true)
            .with_param(
                "hh",
                "str",
                "Forecast start hour in the day, relative to UTC. Must be one of '00', '06', '12', or '18'.",
                true,
            )
            .with_param(
                "stream",
                "str",
                "Stream type. Must be one of 'oper', 'enfo', 'waef', 'wave', 'scda', 'scwv', or 'mmsf'.",
                true,
            )
            .with_param("step_size", "int", "Forecast step size in hours.", true)
            .with_param(
                "file_type",
                "str",
                "Type of the file. Must be one of 'fc', 'ef', 'ep', or 'tf', which stand for 'forecast', 'ensemble forecast', 'ensemble probability', and 'trajectory forecast' respectively.",
                true,
            )
            .with_param(
                "file_format",
                "str",
                "Format of the file. Must be one of 'grib2' or 'bufr'.",
                true,
            )
    }

    async fn call(&self, arguments: ToolArguments) -> Result<String> {
        let year = require_i64(&arguments, "year")?;
        let month = require_i64(&arguments, "month")?;
        let day = require_i64(&arguments, "day")?;
        let date = format_date(year, month, day)?;

        let step_size = require_i64(&arguments, "step_size")?;
        if step_size < 0 {
            return Err(Error::invalid_argument(format!(
                "step_size must be non-negative, got {}",
                step_size
            )));
        }
        let step = format!("{}h", step_size);

        // models often send the hour as a bare number
        let hh = match arguments.get("hh").and_then(|v| v.as_i64()) {
            Some(h) => format!("{:02}", h),
            None => require_str(&arguments, "hh")?.to_string(),
        };

        let file = ForecastFile {
            date: &date,
            hh: &hh,
            model: "ifs",
            resol: "0p25",
            stream: require_str(&arguments, "stream")?,
            step: &step,
            file_type: require_str(&arguments, "file_type")?,
            file_format: require_str(&arguments, "file_format")?,
        };

        let url = self.client.build_file_url(&file)?;
        let save_path = PathBuf::from(file.file_name());
        debug!(url = %url, path = %save_path.display(), "downloading forecast");

        let bytes = self.client.download_file(&url, &save_path).await?;
        info!(url = %url, bytes, "forecast downloaded");

        Ok(format!(
            "Downloaded {} to {} ({} bytes)",
            url,
            save_path.display(),
            bytes
        ))
    }
}

fn format_date(year: i64, month: i64, day: i64) -> Result<String> {
    let date = i32::try_from(year)
        .ok()
        .zip(u32::try_from(month).ok())
        .zip(u32::try_from(day).ok())
        .and_then(|((y, m), d)| chrono::NaiveDate::from_ymd_opt(y, m, d))
        .ok_or_else(|| {
            Error::invalid_argument(format!("invalid date {}-{}-{}", year, month, day))
        })?;
    Ok(date.format("%Y%m%d").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentbench_core::ErrorKind;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn oper_fc<'a>(date: &'a str) -> ForecastFile<'a> {
        ForecastFile {
            date,
            hh: "06",
            model: "ifs",
            resol: "0p25",
            stream: "oper",
            step: "24h",
            file_type: "fc",
            file_format: "grib2",
        }
    }

    /// Serve a single HTTP response on a local port
    async fn serve_once(status_line: &'static str, body: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let head = format!(
                "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                status_line,
                body.len()
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(body).await.unwrap();
            socket.flush().await.unwrap();
        });
        format!("http://{}", addr)
    }

    /// Serve `responses` to consecutive connections, recording each request head
    async fn serve_sequence(
        responses: Vec<(&'static str, Vec<u8>)>,
    ) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = requests.clone();
        tokio::spawn(async move {
            for (status_line, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = [0u8; 4096];
                let n = socket.read(&mut buf).await.unwrap_or(0);
                seen.lock().unwrap().push(String::from_utf8_lossy(&buf[..n]).into_owned());
                let head = format!(
                    "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    status_line,
                    body.len()
                );
                socket.write_all(head.as_bytes()).await.unwrap();
                socket.write_all(&body).await.unwrap();
                socket.flush().await.unwrap();
            }
        });
        (format!("http://{}", addr), requests)
    }

    const INDEX: &str = concat!(
        "{\"domain\": \"g\", \"param\": \"msl\", \"_offset\": 0, \"_length\": 4}\n",
        "{\"domain\": \"g\", \"param\": \"2t\", \"_offset\": 4, \"_length\": 6}\n",
    );

    #[tokio::test]
    async fn test_download_single_param() {
        let (root, requests) = serve_sequence(vec![
            ("200 OK", INDEX.as_bytes().to_vec()),
            ("206 Partial Content", b"2t-msg".to_vec()),
        ])
        .await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("2t.grib2");

        let bytes = EcmwfClient::with_root_url(&root)
            .download_single_param(&oper_fc("20250422"), "2t", &path)
            .await
            .unwrap();

        assert_eq!(bytes, 6);
        assert_eq!(std::fs::read(&path).unwrap(), b"2t-msg");

        let requests = requests.lock().unwrap();
        assert!(requests[0].starts_with(
            "GET /20250422/06z/ifs/0p25/oper/20250422060000-24h-oper-fc.index "
        ));
        assert!(requests[1].starts_with(
            "GET /20250422/06z/ifs/0p25/oper/20250422060000-24h-oper-fc.grib2 "
        ));
        assert!(requests[1].to_ascii_lowercase().contains("range: bytes=4-9"));
    }

    #[tokio::test]
    async fn test_download_field_unknown_param() {
        let (root, _requests) = serve_sequence(vec![("200 OK", INDEX.as_bytes().to_vec())]).await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tp.grib2");

        let err = EcmwfClient::with_root_url(&root)
            .download_single_param(&oper_fc("20250422"), "tp", &path)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(err.message().contains("Parameter 'tp' not found"));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_download_field_rejects_failed_range() {
        let (root, _requests) = serve_sequence(vec![
            ("200 OK", INDEX.as_bytes().to_vec()),
            ("416 Range Not Satisfiable", Vec::new()),
        ])
        .await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("msl.grib2");

        let err = EcmwfClient::with_root_url(&root)
            .download_single_param(&oper_fc("20250422"), "msl", &path)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NetworkFailed);
        assert!(err.message().contains("Failed to download field. Status code: 416"));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_single_param_requires_grib2() {
        let mut file = oper_fc("20250422");
        file.file_format = "bufr";
        let dir = tempfile::tempdir().unwrap();

        let err = EcmwfClient::new()
            .download_single_param(&file, "2t", &dir.path().join("x"))
            .await
            .unwrap_err();
        assert!(err.message().contains("only supported for grib2"));
    }

    #[test]
    fn test_build_file_url() {
        let client = EcmwfClient::new();
        let url = client.build_file_url(&oper_fc("20250422")).unwrap();
        assert_eq!(
            url,
            "https://data.ecmwf.int/forecasts/20250422/06z/ifs/0p25/oper/20250422060000-24h-oper-fc.grib2"
        );
    }

    #[test]
    fn test_build_file_url_validation() {
        let client = EcmwfClient::with_root_url("http://mirror.local/");
        assert_eq!(client.root_url(), "http://mirror.local");

        let mut file = oper_fc("20250422");
        file.hh = "03";
        let err = client.build_file_url(&file).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(err.message().contains("forecast hour '03'"));

        let mut file = oper_fc("20250422");
        file.stream = "daily";
        assert!(client.build_file_url(&file).is_err());

        let mut file = oper_fc("20250422");
        file.file_format = "netcdf";
        assert!(client.build_file_url(&file).is_err());
    }

    #[test]
    fn test_format_date() {
        assert_eq!(format_date(2025, 4, 2).unwrap(), "20250402");
        assert!(format_date(2025, 2, 30).is_err());
        assert!(format_date(2025, -1, 1).is_err());
    }

    #[tokio::test]
    async fn test_download_file() {
        let root = serve_once("200 OK", b"GRIB-data").await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.grib2");

        let client = EcmwfClient::with_root_url(&root);
        let bytes = client
            .download_file(&format!("{}/file.grib2", root), &path)
            .await
            .unwrap();

        assert_eq!(bytes, 9);
        assert_eq!(std::fs::read(&path).unwrap(), b"GRIB-data");
    }

    #[tokio::test]
    async fn test_download_file_not_found() {
        let root = serve_once("404 Not Found", b"").await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.grib2");

        let err = EcmwfClient::with_root_url(&root)
            .download_file(&format!("{}/missing.grib2", root), &path)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NetworkFailed);
        assert!(err.message().contains("Status code: 404"));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_tool_rejects_invalid_arguments() {
        let tool = EcmwfDownloadTool::default();
        let args = json!({
            "year": 2025, "month": 4, "day": 22, "hh": "07",
            "stream": "oper", "step_size": 24, "file_type": "fc", "file_format": "grib2"
        });
        let err = tool.call(args.as_object().cloned().unwrap()).await.unwrap_err();
        assert!(err.message().contains("'07'"));

        let err = tool.call(ToolArguments::new()).await.unwrap_err();
        assert!(err.message().contains("year"));
    }

    #[test]
    fn test_definition_lists_required_params() {
        let def = EcmwfDownloadTool::default().definition();
        assert_eq!(
            def.required_params(),
            vec!["year", "month", "day", "hh", "stream", "step_size", "file_type", "file_format"]
        );
    }
}
