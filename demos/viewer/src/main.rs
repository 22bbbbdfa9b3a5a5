//! Preview viewer.
//!
//! `viewer [view_set.json] [image directory]`, configured by `relight.toml` in the
//! working directory if present.

use std::path::Path;

use relight::export::DirectoryExporter;
use relight::preview::PreviewLoader;
use relight::{Config, SourceDescriptor};

fn main() -> anyhow::Result<()> {
    let config = Config::from_file_or_default(Path::new("relight.toml"))?;
    let mut args = std::env::args().skip(1);
    let source = args.next().map(|view_set| {
        let source = SourceDescriptor::new(view_set);
        match args.next() {
            Some(images) => source.with_image_directory(images),
            None => source,
        }
    });
    relight::flow::run(
        PreviewLoader::new(config.marker_size),
        DirectoryExporter,
        config,
        source,
    )
}
