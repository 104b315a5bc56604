use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::seq::SliceRandom;

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "gif"];

/// Supplies image pairs for new sessions and resolves names for the judge.
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Two distinct image references.
    async fn pick_two_distinct(&self) -> Result<[String; 2]>;

    /// Where the judge can read the named image from.
    fn path_for(&self, name: &str) -> PathBuf;
}

/// Images served from a directory on disk.
pub struct DirectoryImages {
    dir: PathBuf,
}

impl DirectoryImages {
    /// Use `dir`, creating it if it does not exist yet.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create image directory: {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("Failed to read image directory: {}", self.dir.display()))?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if is_image(&name) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

#[async_trait]
impl ImageSource for DirectoryImages {
    async fn pick_two_distinct(&self) -> Result<[String; 2]> {
        let names = self.list().await?;
        pick_pair(&names).with_context(|| {
            format!(
                "Need at least two images in {}, found {}",
                self.dir.display(),
                names.len()
            )
        })
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

/// A fixed pool of image names, resolved relative to `root`.
pub struct StaticImages {
    names: Vec<String>,
    root: PathBuf,
}

impl StaticImages {
    pub fn new(names: Vec<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            names,
            root: root.into(),
        }
    }
}

#[async_trait]
impl ImageSource for StaticImages {
    async fn pick_two_distinct(&self) -> Result<[String; 2]> {
        pick_pair(&self.names).context("Static image pool needs at least two distinct names")
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

fn is_image(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

fn pick_pair(names: &[String]) -> Option<[String; 2]> {
    let mut unique: Vec<&String> = names.iter().collect();
    unique.sort();
    unique.dedup();
    let mut rng = rand::thread_rng();
    let chosen: Vec<&&String> = unique.choose_multiple(&mut rng, 2).collect();
    match chosen.as_slice() {
        [a, b] => {
            let mut pair = [(**a).clone(), (**b).clone()];
            // choose_multiple keeps source order; shuffle so position carries no signal.
            pair.shuffle(&mut rng);
            Some(pair)
        }
        _ => None,
    }
}
