//! services/bot/src/adapters/ilovepdf.rs
//!
//! This module contains the adapter for the iLovePDF REST API.
//! It implements the `ConversionService` port from the `core` crate.
//!
//! Every call runs one remote task: authenticate, start the tool, upload the inputs,
//! process, wait for the task to finish, download the result and release the task.

use async_trait::async_trait;
use bytes::Bytes;
use percent_encoding::percent_decode_str;
use reqwest::{header, Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::adapters::staging::Staging;
use crate::config::Config;
use pdfbot_core::domain::{ParamValue, Params, TransformKind};
use pdfbot_core::ports::{ConversionService, GatewayError, GatewayResult};

/// Label the protect tool stores alongside the password.
const FILE_ENCRYPTION_KEY: &str = "ilovepdfbot";

//=========================================================================================
// Tool Table
//=========================================================================================

/// A fully resolved remote tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolPlan {
    pub tool: &'static str,
    /// Top-level options of the process request.
    pub options: Map<String, Value>,
    /// Options repeated on every uploaded file entry.
    pub file_options: Map<String, Value>,
}

impl ToolPlan {
    fn new(tool: &'static str) -> Self {
        Self {
            tool,
            options: Map::new(),
            file_options: Map::new(),
        }
    }

    fn option(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.options.insert(name.to_string(), value.into());
        self
    }

    /// Builds the plan for one transform, pulling the user's parameter out of `params`.
    pub fn for_transform(kind: TransformKind, params: &Params) -> GatewayResult<Self> {
        let plan = match kind {
            TransformKind::Compress => Self::new("compress"),
            TransformKind::ImageToPdf => Self::new("imagepdf")
                .option("orientation", "portrait")
                .option("margin", 0)
                .option("pagesize", "fit"),
            TransformKind::OfficeToPdf => Self::new("officepdf"),
            TransformKind::AddPageNumbers => Self::new("pagenumber"),
            TransformKind::PdfToPdfA => Self::new("pdfa"),
            TransformKind::PdfToJpg => Self::new("pdfjpg").option("pdfjpg_mode", "pages"),
            TransformKind::Protect => Self::new("protect")
                .option("password", required(params, "password")?)
                .option("file_encryption_key", FILE_ENCRYPTION_KEY),
            TransformKind::Rotate => {
                let mut plan = Self::new("rotate");
                plan.file_options
                    .insert("rotate".to_string(), required(params, "rotate")?);
                plan
            }
            TransformKind::Split => Self::new("split")
                .option("split_mode", "fixed_range")
                .option("fixed_range", required(params, "fixed_range")?),
            TransformKind::Unlock => Self::new("unlock"),
            TransformKind::Watermark => Self::new("watermark")
                .option("mode", "text")
                .option("text", required(params, "text")?)
                .option("rotation", 30)
                .option("font_size", 150)
                .option("transparency", 40),
        };
        Ok(plan)
    }

    pub fn merge() -> Self {
        Self::new("merge")
    }

    /// The JSON body of the process request.
    fn process_body(&self, task: &str, files: &[UploadedFile]) -> Value {
        let files: Vec<Value> = files
            .iter()
            .map(|file| {
                let mut entry = Map::new();
                entry.insert("server_filename".into(), json!(file.server_filename));
                entry.insert("filename".into(), json!(file.filename));
                entry.extend(self.file_options.clone());
                Value::Object(entry)
            })
            .collect();

        let mut body = Map::new();
        body.insert("task".into(), json!(task));
        body.insert("tool".into(), json!(self.tool));
        body.insert("files".into(), Value::Array(files));
        body.extend(self.options.clone());
        Value::Object(body)
    }
}

fn required(params: &Params, name: &str) -> GatewayResult<Value> {
    match params.get(name) {
        Some(ParamValue::Int(n)) => Ok(json!(n)),
        Some(ParamValue::Text(s)) => Ok(json!(s)),
        None => Err(GatewayError::Invariant(format!(
            "missing the '{}' option",
            name
        ))),
    }
}

//=========================================================================================
// Wire Types
//=========================================================================================

#[derive(Debug, Deserialize)]
struct AuthResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct StartResponse {
    server: String,
    task: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    server_filename: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    status_message: Option<String>,
}

#[derive(Debug)]
struct UploadedFile {
    server_filename: String,
    filename: String,
}

/// A started remote task and the server it lives on.
#[derive(Debug, Clone)]
struct RemoteTask {
    base: String,
    task: String,
}

#[derive(Debug, PartialEq, Eq)]
enum TaskStatus {
    Done,
    Pending,
    Failed(String),
}

fn classify(status: Option<&str>) -> TaskStatus {
    match status {
        Some(s) if s.starts_with("TaskSuccess") => TaskStatus::Done,
        Some(s @ ("TaskError" | "TaskDeleted" | "TaskNotFound")) => {
            TaskStatus::Failed(s.to_string())
        }
        _ => TaskStatus::Pending,
    }
}

/// Processing servers are returned as bare host names; test doubles return full URLs.
fn server_base(server: &str) -> String {
    let server = server.trim_end_matches('/');
    if server.starts_with("http://") || server.starts_with("https://") {
        server.to_string()
    } else {
        format!("https://{}", server)
    }
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements the `ConversionService` port using the iLovePDF API.
#[derive(Clone)]
pub struct ILovePdfAdapter {
    client: Client,
    api_url: String,
    public_key: String,
    job_timeout: Duration,
    poll_interval: Duration,
}

impl ILovePdfAdapter {
    /// Creates a new `ILovePdfAdapter`.
    pub fn new(
        client: Client,
        api_url: impl Into<String>,
        public_key: impl Into<String>,
        job_timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            client,
            api_url: api_url.into(),
            public_key: public_key.into(),
            job_timeout,
            poll_interval,
        }
    }

    /// Builds the adapter and its HTTP client from the service configuration.
    pub fn from_config(config: &Config) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(config.http_timeout).build()?;
        Ok(Self::new(
            client,
            config.api_url.clone(),
            config.public_key.clone(),
            config.job_timeout,
            config.poll_interval,
        ))
    }

    /// Runs a whole remote task and returns the single file it left in `output_dir`.
    async fn execute(
        &self,
        plan: ToolPlan,
        inputs: &[PathBuf],
        output_dir: &Path,
    ) -> GatewayResult<PathBuf> {
        if inputs.is_empty() {
            return Err(GatewayError::Invariant("no input files".to_string()));
        }

        let token = self.authenticate().await?;
        let task = self.start(&token, plan.tool).await?;
        info!(
            "Started {} task {} with {} file(s)",
            plan.tool,
            task.task,
            inputs.len()
        );

        let outcome = match tokio::time::timeout(
            self.job_timeout,
            self.drive(&token, &task, &plan, inputs, output_dir),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(GatewayError::Timeout(self.job_timeout)),
        };

        // The remote task is released on every path once it was started.
        self.release(&token, &task).await;
        outcome?;

        let result = Staging::read_single_output(output_dir)
            .await
            .ok_or_else(|| GatewayError::MissingOutput(output_dir.to_path_buf()))?;
        info!("Finished {} task {}", plan.tool, task.task);
        Ok(result)
    }

    async fn drive(
        &self,
        token: &str,
        task: &RemoteTask,
        plan: &ToolPlan,
        inputs: &[PathBuf],
        output_dir: &Path,
    ) -> GatewayResult<()> {
        let mut files = Vec::with_capacity(inputs.len());
        for input in inputs {
            files.push(self.upload(token, task, input).await?);
        }

        let body = plan.process_body(&task.task, &files);
        let processed: StatusResponse = checked(
            self.client
                .post(format!("{}/v1/process", task.base))
                .bearer_auth(token)
                .json(&body)
                .send()
                .await
                .map_err(network)?,
        )
        .await?
        .json()
        .await
        .map_err(network)?;

        match classify(processed.status.as_deref()) {
            TaskStatus::Done => {}
            TaskStatus::Failed(status) => return Err(remote_failure(status, processed)),
            TaskStatus::Pending => self.wait(token, task).await?,
        }

        self.download(token, task, output_dir).await
    }

    async fn authenticate(&self) -> GatewayResult<String> {
        let response = self
            .client
            .post(format!("{}/v1/auth", self.api_url))
            .json(&json!({ "public_key": self.public_key }))
            .send()
            .await
            .map_err(network)?;

        if matches!(
            response.status(),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            return Err(GatewayError::Auth(format!(
                "the public key was refused ({})",
                response.status()
            )));
        }
        let auth: AuthResponse = checked(response)
            .await?
            .json()
            .await
            .map_err(|e| GatewayError::Auth(e.to_string()))?;
        Ok(auth.token)
    }

    async fn start(&self, token: &str, tool: &str) -> GatewayResult<RemoteTask> {
        let started: StartResponse = checked(
            self.client
                .get(format!("{}/v1/start/{}", self.api_url, tool))
                .bearer_auth(token)
                .send()
                .await
                .map_err(network)?,
        )
        .await?
        .json()
        .await
        .map_err(network)?;

        Ok(RemoteTask {
            base: server_base(&started.server),
            task: started.task,
        })
    }

    async fn upload(
        &self,
        token: &str,
        task: &RemoteTask,
        input: &Path,
    ) -> GatewayResult<UploadedFile> {
        let filename = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                GatewayError::Invariant(format!("{} has no file name", input.display()))
            })?;
        let content = tokio::fs::read(input).await?;
        debug!("Uploading {} ({} bytes) to task {}", filename, content.len(), task.task);

        let part = reqwest::multipart::Part::bytes(content).file_name(filename.clone());
        let form = reqwest::multipart::Form::new()
            .text("task", task.task.clone())
            .part("file", part);

        let uploaded: UploadResponse = checked(
            self.client
                .post(format!("{}/v1/upload", task.base))
                .bearer_auth(token)
                .multipart(form)
                .send()
                .await
                .map_err(network)?,
        )
        .await?
        .json()
        .await
        .map_err(network)?;

        Ok(UploadedFile {
            server_filename: uploaded.server_filename,
            filename,
        })
    }

    /// Polls the task until it succeeds or fails. The caller bounds the total wait.
    async fn wait(&self, token: &str, task: &RemoteTask) -> GatewayResult<()> {
        loop {
            tokio::time::sleep(self.poll_interval).await;
            let status: StatusResponse = checked(
                self.client
                    .get(format!("{}/v1/task/{}", task.base, task.task))
                    .bearer_auth(token)
                    .send()
                    .await
                    .map_err(network)?,
            )
            .await?
            .json()
            .await
            .map_err(network)?;

            match classify(status.status.as_deref()) {
                TaskStatus::Done => return Ok(()),
                TaskStatus::Failed(s) => return Err(remote_failure(s, status)),
                TaskStatus::Pending => debug!("Task {} still running", task.task),
            }
        }
    }

    async fn download(
        &self,
        token: &str,
        task: &RemoteTask,
        output_dir: &Path,
    ) -> GatewayResult<()> {
        let response = checked(
            self.client
                .get(format!("{}/v1/download/{}", task.base, task.task))
                .bearer_auth(token)
                .send()
                .await
                .map_err(network)?,
        )
        .await?;

        let name = output_file_name(&response);
        let body: Bytes = response.bytes().await.map_err(network)?;
        tokio::fs::create_dir_all(output_dir).await?;
        tokio::fs::write(output_dir.join(&name), &body).await?;
        debug!("Downloaded {} ({} bytes) from task {}", name, body.len(), task.task);
        Ok(())
    }

    /// Deletes the remote task. Failures are logged and otherwise ignored.
    async fn release(&self, token: &str, task: &RemoteTask) {
        let result = self
            .client
            .delete(format!("{}/v1/task/{}", task.base, task.task))
            .bearer_auth(token)
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => {
                debug!("Released task {}", task.task)
            }
            Ok(response) => warn!(
                "Releasing task {} returned {}",
                task.task,
                response.status()
            ),
            Err(e) => warn!("Releasing task {} failed: {}", task.task, e),
        }
    }
}

//=========================================================================================
// `ConversionService` Trait Implementation
//=========================================================================================

#[async_trait]
impl ConversionService for ILovePdfAdapter {
    async fn run(
        &self,
        kind: TransformKind,
        inputs: &[PathBuf],
        params: &Params,
        output_dir: &Path,
    ) -> GatewayResult<PathBuf> {
        let plan = ToolPlan::for_transform(kind, params)?;
        self.execute(plan, inputs, output_dir).await
    }

    async fn merge(&self, inputs: &[PathBuf], output_dir: &Path) -> GatewayResult<PathBuf> {
        if inputs.len() < 2 {
            return Err(GatewayError::Invariant(format!(
                "merging needs at least two files, got {}",
                inputs.len()
            )));
        }
        self.execute(ToolPlan::merge(), inputs, output_dir).await
    }
}

//=========================================================================================
// Helpers
//=========================================================================================

fn network(e: reqwest::Error) -> GatewayError {
    GatewayError::Network(e.to_string())
}

fn remote_failure(status: String, response: StatusResponse) -> GatewayError {
    match response.status_message {
        Some(message) => GatewayError::Remote(format!("{}: {}", status, message)),
        None => GatewayError::Remote(status),
    }
}

/// Turns a non-success HTTP status into a `Remote` error carrying the response body.
async fn checked(response: Response) -> GatewayResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().path().to_string();
    let body = response.text().await.unwrap_or_default();
    Err(GatewayError::Remote(format!("{} {}: {}", status, url, body)))
}

/// The result's file name: from `Content-Disposition`, else derived from the content type.
fn output_file_name(response: &Response) -> String {
    let headers = response.headers();
    let from_disposition = headers
        .get(header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(disposition_file_name);
    if let Some(name) = from_disposition {
        return name;
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let extension = if content_type.contains("zip") {
        "zip"
    } else if content_type.contains("jpeg") || content_type.contains("jpg") {
        "jpg"
    } else {
        "pdf"
    };
    format!("output.{}", extension)
}

fn disposition_file_name(value: &str) -> Option<String> {
    let mut plain = None;
    for part in value.split(';').map(str::trim) {
        if let Some(encoded) = part.strip_prefix("filename*=") {
            // RFC 5987: charset'language'percent-encoded
            let raw = encoded.rsplit('\'').next().unwrap_or(encoded);
            if let Some(name) = safe_name(&percent_decode_str(raw).decode_utf8_lossy()) {
                return Some(name);
            }
        } else if let Some(quoted) = part.strip_prefix("filename=") {
            plain = safe_name(quoted.trim_matches('"'));
        }
    }
    plain
}

/// Keeps only the last path component so a header can never point outside the output dir.
fn safe_name(raw: &str) -> Option<String> {
    let name = raw.rsplit(['/', '\\']).next()?.trim();
    (!name.is_empty() && name != "." && name != "..").then(|| name.to_string())
}
