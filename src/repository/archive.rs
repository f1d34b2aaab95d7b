use std::io::{Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::bundle::{Bundle, Manifest};
use crate::errors::BundlerError;

const MANIFEST_ENTRY: &str = ".manifest";
const DATA_ENTRY: &str = "data.json";

/// Write `bundle` as a gzipped tar stream: `.manifest`, `data.json` and one
/// entry per module at its path.
pub fn encode<W: Write>(bundle: &Bundle, writer: W) -> Result<(), BundlerError> {
    let encoder = GzEncoder::new(writer, Compression::default());
    let mut tar = tar::Builder::new(encoder);

    let manifest = serde_json::to_vec(&bundle.manifest().to_json())
        .map_err(|e| BundlerError::CorruptManifest(e.to_string()))?;
    append(&mut tar, MANIFEST_ENTRY, &manifest)?;
    append(&mut tar, DATA_ENTRY, b"{}")?;

    for (path, source) in bundle.modules() {
        // tar paths must be relative; the engine accepts either form
        append(&mut tar, path.trim_start_matches('/'), source.as_bytes())?;
    }

    let encoder = tar.into_inner()?;
    encoder.finish()?;
    Ok(())
}

/// Convenience wrapper writing the archive to a file path.
pub fn encode_to_path(bundle: &Bundle, path: &Path) -> Result<(), BundlerError> {
    let file = std::fs::File::create(path)?;
    encode(bundle, file)
}

fn append<W: Write>(
    tar: &mut tar::Builder<W>,
    name: &str,
    data: &[u8],
) -> Result<(), BundlerError> {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    tar.append_data(&mut header, name, data)?;
    Ok(())
}

/// Read a bundle back from a gzipped tar stream. Entry names are accepted
/// with or without a leading `/` or `./`; module paths are normalized to
/// the leading-slash form used by the bundle.
pub fn decode<R: Read>(reader: R) -> Result<Bundle, BundlerError> {
    let mut archive = tar::Archive::new(GzDecoder::new(reader));

    let mut manifest: Option<Manifest> = None;
    let mut modules = std::collections::BTreeMap::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        let name = entry.path()?.to_string_lossy().into_owned();
        let name = name.trim_start_matches("./").trim_start_matches('/');

        let mut contents = String::new();
        entry.read_to_string(&mut contents)?;

        match name {
            MANIFEST_ENTRY => {
                let value: serde_json::Value = serde_json::from_str(&contents)
                    .map_err(|e| BundlerError::CorruptManifest(e.to_string()))?;
                manifest = Some(Manifest::from_json(&value)?);
            }
            DATA_ENTRY => {}
            module if module.ends_with(".rego") => {
                modules.insert(format!("/{module}"), contents);
            }
            other => {
                tracing::warn!(entry = other, "ignoring unexpected archive entry");
            }
        }
    }

    let manifest =
        manifest.ok_or_else(|| BundlerError::CorruptManifest("missing `.manifest`".to_string()))?;
    Ok(Bundle::from_parts(modules, manifest))
}
