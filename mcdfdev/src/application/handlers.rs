use std::path::{Path, PathBuf};

use mcdf_core::error::{McdfError, Result};
use mcdf_core::hash::ContentHasher;
use mcdf_core::snapshot::EntitySnapshot;
use mcdf_core::{ArchiveReader, PackOptions, Settings, TargetRegistry, collect_blobs, write_archive};
use tracing::info;

pub fn load_settings(config: Option<&Path>) -> Result<Settings> {
    match config {
        Some(p) => Settings::load(p),
        None => Ok(Settings::default()),
    }
}

fn open(archive: &Path) -> Result<ArchiveReader> {
    ArchiveReader::open(archive)?.ok_or_else(|| McdfError::NotAnArchive(archive.to_path_buf()))
}

/// Split `logical=local`; the first `=` separates the two.
pub fn parse_mapping(arg: &str) -> Result<(String, PathBuf)> {
    match arg.split_once('=') {
        Some((logical, local)) if !logical.is_empty() && !local.is_empty() => {
            Ok((logical.to_string(), PathBuf::from(local)))
        }
        _ => Err(McdfError::Format(format!(
            "expected logical=local, got {arg:?}"
        ))),
    }
}

fn read_optional(path: Option<PathBuf>) -> Result<String> {
    match path {
        Some(p) => Ok(std::fs::read_to_string(p)?),
        None => Ok(String::new()),
    }
}

pub fn handle_inspect(archive: PathBuf) -> Result<()> {
    let reader = open(&archive)?;
    let p = reader.payload();
    println!("archive:     {}", archive.display());
    println!("version:     {}", reader.version());
    println!("description: {}", p.description);
    println!("appearance:  {} bytes", p.appearance_state.len());
    println!("shape:       {} bytes", p.shape_profile_state.len());
    println!("overrides:   {} bytes", p.override_data.len());
    println!("blobs:       {} ({} bytes)", p.files.len(), p.blob_bytes());
    for f in &p.files {
        println!("  {} {:>10}  {}", f.fingerprint, f.length, f.reference_paths.join(", "));
    }
    reader.close();
    Ok(())
}

pub fn handle_extract(archive: PathBuf, dest: PathBuf) -> Result<()> {
    let mut reader = open(&archive)?;
    let mapping = reader.extract_blobs(&dest)?;
    reader.close();
    for (logical, file) in &mapping {
        println!("{logical} -> {}", file.display());
    }
    eprintln!("extract: {} paths into {}", mapping.len(), dest.display());
    Ok(())
}

pub fn handle_pack(
    out: PathBuf,
    appearance: PathBuf,
    shape: Option<PathBuf>,
    overrides: Option<PathBuf>,
    description: String,
    level: i32,
    files: Vec<String>,
) -> Result<()> {
    let appearance_state = std::fs::read_to_string(&appearance)?;
    if appearance_state.is_empty() {
        return Err(McdfError::SnapshotUnavailable(format!(
            "{} is empty",
            appearance.display()
        )));
    }
    let resolved = files
        .iter()
        .map(|a| parse_mapping(a))
        .collect::<Result<Vec<_>>>()?;

    let blobs = collect_blobs(&resolved, &ContentHasher::new(), || {})?;
    let snapshot = EntitySnapshot {
        appearance_state,
        shape_profile_state: read_optional(shape)?,
        override_data: read_optional(overrides)?,
        blobs,
    };
    let (payload, sources) = snapshot.into_payload(&description);
    let written = write_archive(&out, &payload, &sources, &PackOptions { level }, |_| {})?;
    info!(out = %out.display(), blobs = payload.files.len(), "archive packed");
    eprintln!(
        "pack: {} paths, {} blobs, {} bytes uncompressed -> {}",
        resolved.len(),
        payload.files.len(),
        written,
        out.display()
    );
    Ok(())
}

pub fn handle_registry_list(registry: PathBuf) -> Result<()> {
    let reg = TargetRegistry::load(registry);
    for t in reg.iter() {
        println!("{}@{}  {}", t.name, t.home_zone, t.archive_path.display());
    }
    Ok(())
}

pub fn handle_registry_add(
    registry: PathBuf,
    name: String,
    home_zone: String,
    archive: PathBuf,
) -> Result<()> {
    open(&archive)?.close();
    let mut reg = TargetRegistry::load(registry);
    let t = reg.register(&name, &home_zone, archive)?;
    eprintln!("registry: {} -> {}", t.key(), t.archive_path.display());
    Ok(())
}

pub fn handle_registry_remove(registry: PathBuf, name: String, home_zone: String) -> Result<()> {
    let mut reg = TargetRegistry::load(registry);
    if reg.unregister(&name, &home_zone)? {
        eprintln!("registry: removed {name}@{home_zone}");
    } else {
        eprintln!("registry: {name}@{home_zone} was not registered");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_requires_both_sides() {
        let (l, p) = parse_mapping("chara/a.tex=C:/mods/a=b.tex").unwrap();
        assert_eq!(l, "chara/a.tex");
        assert_eq!(p, PathBuf::from("C:/mods/a=b.tex"));
        assert!(parse_mapping("chara/a.tex").is_err());
        assert!(parse_mapping("=x").is_err());
        assert!(parse_mapping("x=").is_err());
    }

    #[test]
    fn pack_then_register_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let look = dir.path().join("look.txt");
        std::fs::write(&look, "appearance").unwrap();
        let tex = dir.path().join("a.tex");
        std::fs::write(&tex, b"texture").unwrap();
        let out = dir.path().join("out.mcdf");

        handle_pack(
            out.clone(),
            look,
            None,
            None,
            "demo".into(),
            3,
            vec![
                format!("chara/a.tex={}", tex.display()),
                format!("chara/b.tex={}", tex.display()),
            ],
        )
        .unwrap();

        let reader = ArchiveReader::open(&out).unwrap().unwrap();
        assert_eq!(reader.payload().files.len(), 1);
        assert_eq!(reader.payload().description, "demo");
        reader.close();

        let reg_path = dir.path().join("reg.json");
        handle_registry_add(reg_path.clone(), "Ari".into(), "Midgardsormr".into(), out).unwrap();
        assert_eq!(TargetRegistry::load(&reg_path).len(), 1);
        handle_registry_remove(reg_path.clone(), "ARI".into(), "midgardsormr".into()).unwrap();
        assert!(TargetRegistry::load(&reg_path).is_empty());
    }

    #[test]
    fn registering_a_non_archive_fails() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("bogus.mcdf");
        std::fs::write(&bogus, "plain text").unwrap();
        let err = handle_registry_add(dir.path().join("r.json"), "A".into(), "B".into(), bogus)
            .unwrap_err();
        assert!(matches!(err, McdfError::NotAnArchive(_)));
    }
}
