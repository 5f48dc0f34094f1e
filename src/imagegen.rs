use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::probe::{MediaAsset, MediaKind};
use crate::utils::sequence_name;

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "webp"];

/// Source of the still images a video is built from.
pub trait ImageProvider {
    /// Produces one image for `prompt`, preferably at `out`, and returns where it landed.
    fn generate(&mut self, prompt: &str, out: &Path) -> Result<PathBuf>;
}

/// Pre-rendered images from a directory, handed out in file-name order.
#[derive(Debug)]
pub struct DirectoryImages {
    images: Vec<PathBuf>,
    next: usize,
}

impl DirectoryImages {
    pub fn open(dir: &Path, name_filter: Option<&str>) -> Result<Self> {
        let mut images = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let is_image = path.extension().and_then(|e| e.to_str()).is_some_and(|ext| {
                IMAGE_EXTENSIONS
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(ext))
            });
            let matches = name_filter.is_none_or(|f| name.contains(f));
            if path.is_file() && is_image && matches {
                images.push(path);
            }
        }
        images.sort();
        info!("Found {} image files in {}", images.len(), dir.display());
        Ok(Self { images, next: 0 })
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

impl ImageProvider for DirectoryImages {
    fn generate(&mut self, prompt: &str, _out: &Path) -> Result<PathBuf> {
        let Some(path) = self.images.get(self.next) else {
            return Err(Error::ImageProvider(format!(
                "ran out of pre-rendered images after {} (prompt: {:.60})",
                self.images.len(),
                prompt
            )));
        };
        self.next += 1;
        Ok(path.clone())
    }
}

#[derive(Debug, Serialize)]
struct ImageRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    size: &'a str,
    n: u32,
    response_format: &'a str,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    data: Vec<ImageDatum>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
    b64_json: Option<String>,
}

/// OpenAI-compatible `/v1/images/generations` endpoint.
pub struct HttpImages {
    client: Client,
    url: String,
    model: String,
    size: String,
}

impl HttpImages {
    pub fn new(endpoint: &str, model: &str, size: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600))
            .user_agent("reelsmith/0.1")
            .build()
            .map_err(|e| Error::ImageProvider(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: generations_url(endpoint),
            model: model.to_string(),
            size: size.to_string(),
        })
    }
}

pub fn generations_url(endpoint: &str) -> String {
    let base = endpoint.trim_end_matches('/');
    if base.ends_with("/images/generations") {
        base.to_string()
    } else if base.ends_with("/v1") {
        format!("{}/images/generations", base)
    } else {
        format!("{}/v1/images/generations", base)
    }
}

fn decode_first_image(body: &str) -> Result<Vec<u8>> {
    let parsed: ImageResponse = serde_json::from_str(body)
        .map_err(|e| Error::ImageProvider(format!("unexpected response: {}", e)))?;
    let encoded = parsed
        .data
        .into_iter()
        .find_map(|d| d.b64_json)
        .ok_or_else(|| Error::ImageProvider("response carried no image data".into()))?;
    STANDARD
        .decode(encoded.trim())
        .map_err(|e| Error::ImageProvider(format!("invalid base64 image: {}", e)))
}

impl ImageProvider for HttpImages {
    fn generate(&mut self, prompt: &str, out: &Path) -> Result<PathBuf> {
        let request = ImageRequest {
            model: &self.model,
            prompt,
            size: &self.size,
            n: 1,
            response_format: "b64_json",
        };
        debug!("Requesting image from {}: {:.80}", self.url, prompt);
        let body = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.text())
            .map_err(|e| Error::ImageProvider(format!("request to {} failed: {}", self.url, e)))?;
        let bytes = decode_first_image(&body)?;
        fs::write(out, bytes)?;
        Ok(out.to_path_buf())
    }
}

/// Non-empty lines of a prompts file, one image per line.
pub fn read_prompts(path: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(path)?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

/// Asks `provider` for one image per prompt, in prompt order.
pub fn render_images(provider: &mut dyn ImageProvider, prompts: &[String], out_dir: &Path) -> Result<Vec<MediaAsset>> {
    fs::create_dir_all(out_dir)?;
    let mut images = Vec::with_capacity(prompts.len());
    for (i, prompt) in prompts.iter().enumerate() {
        let out = out_dir.join(sequence_name("image", i, prompts.len(), "png"));
        let path = provider.generate(prompt, &out)?;
        debug!("Image {}/{}: {}", i + 1, prompts.len(), path.display());
        images.push(MediaAsset::new(path, MediaKind::Image));
    }
    if images.is_empty() {
        return Err(Error::ImageProvider("no images to build clips from".into()));
    }
    Ok(images)
}
