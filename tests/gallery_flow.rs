use anyhow::Result;
use image::{DynamicImage, Rgb, RgbImage};
use rollcall::{
    rebuild, Embedding, EmbeddingProvider, GalleryStore, MatchResult, Recognizer, StoreError,
};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Embeds an image as the normalised colour of its top-left pixel.
/// A black pixel means "no face".
#[derive(Default)]
struct ColorProvider {
    calls: usize,
}

impl EmbeddingProvider for ColorProvider {
    fn extract_embeddings(&mut self, img: &DynamicImage) -> Result<Vec<Embedding>> {
        self.calls += 1;
        let [r, g, b] = img.to_rgb8().get_pixel(0, 0).0;
        if [r, g, b] == [0, 0, 0] {
            return Ok(vec![]);
        }
        Ok(vec![Embedding::from_vec(vec![
            r as f32 / 255.0,
            g as f32 / 255.0,
            b as f32 / 255.0,
        ])])
    }
}

const RED: [u8; 3] = [255, 0, 0];
const BLUE: [u8; 3] = [0, 0, 255];
const GREEN: [u8; 3] = [0, 255, 0];
const BLACK: [u8; 3] = [0, 0, 0];

fn photo(dir: &Path, name: &str, color: [u8; 3]) {
    RgbImage::from_pixel(4, 4, Rgb(color))
        .save(dir.join(name))
        .unwrap();
}

fn probe(color: [u8; 3]) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb(color)))
}

struct Fixture {
    _root: tempfile::TempDir,
    photos: std::path::PathBuf,
    recognizer: Recognizer<ColorProvider>,
}

fn fixture() -> Fixture {
    env_logger::try_init().ok();
    let root = tempfile::tempdir().unwrap();
    let photos = root.path().join("fotos");
    std::fs::create_dir(&photos).unwrap();
    let store = GalleryStore::new(root.path().join("rostos.bin"));
    Fixture {
        recognizer: Recognizer::new(store, ColorProvider::default(), 0.5),
        photos,
        _root: root,
    }
}

#[test]
fn test_empty_directory_gives_empty_gallery() -> Result<()> {
    let f = fixture();
    let failures = f.recognizer.rebuild_gallery(&f.photos)?;
    assert!(failures.is_empty());
    assert!(f.recognizer.gallery()?.is_empty());
    assert!(f.recognizer.store().path().exists());

    let result = f.recognizer.identify_image(&probe(RED))?;
    assert_eq!(result, MatchResult::NoGalleryData);
    Ok(())
}

#[test]
fn test_identify_before_any_rebuild() -> Result<()> {
    let f = fixture();
    assert_eq!(
        f.recognizer.identify_image(&probe(RED))?,
        MatchResult::NoGalleryData
    );
    Ok(())
}

#[test]
fn test_faceless_photo_is_reported_not_fatal() -> Result<()> {
    let f = fixture();
    photo(&f.photos, "alice.png", RED);
    photo(&f.photos, "nobody.png", BLACK);
    photo(&f.photos, "bob.png", BLUE);
    std::fs::write(f.photos.join("readme.txt"), "ignored")?;

    let failures = f.recognizer.rebuild_gallery(&f.photos)?;
    assert_eq!(failures, ["nobody.png"]);

    let gallery = f.recognizer.gallery()?;
    assert_eq!(gallery.identities(), ["alice", "bob"]);
    Ok(())
}

#[test]
fn test_unreadable_photo_is_reported() -> Result<()> {
    let f = fixture();
    photo(&f.photos, "alice.png", RED);
    std::fs::write(f.photos.join("broken.jpg"), b"not a jpeg")?;

    let failures = f.recognizer.rebuild_gallery(&f.photos)?;
    assert_eq!(failures, ["broken.jpg"]);
    assert_eq!(f.recognizer.gallery()?.identities(), ["alice"]);
    Ok(())
}

#[test]
fn test_match_and_unknown() -> Result<()> {
    let f = fixture();
    photo(&f.photos, "alice.png", RED);
    photo(&f.photos, "bob.png", BLUE);
    f.recognizer.rebuild_gallery(&f.photos)?;

    // 0.1 away from alice, ~1.4 away from bob
    match f.recognizer.identify_image(&probe([230, 0, 0]))? {
        MatchResult::Match { identity, distance } => {
            assert_eq!(identity, "alice");
            assert!(distance < 0.5);
        }
        other => panic!("expected alice, got {:?}", other),
    }

    match f.recognizer.identify_image(&probe(GREEN))? {
        MatchResult::Unknown { distance } => assert!(distance >= 0.5),
        other => panic!("expected unknown, got {:?}", other),
    }

    assert_eq!(
        f.recognizer.identify_image(&probe(BLACK))?,
        MatchResult::NoFaceDetected
    );
    Ok(())
}

#[test]
fn test_identify_from_data_url() -> Result<()> {
    use base64::Engine;

    let f = fixture();
    photo(&f.photos, "bob.png", BLUE);
    f.recognizer.rebuild_gallery(&f.photos)?;

    let mut png = std::io::Cursor::new(Vec::new());
    probe(BLUE).write_to(&mut png, image::ImageFormat::Png)?;
    let url = format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(png.into_inner())
    );

    let result = f.recognizer.identify_bytes(url.as_bytes())?;
    assert_eq!(result.identity(), Some("bob"));
    Ok(())
}

#[test]
fn test_rebuild_is_idempotent() -> Result<()> {
    let f = fixture();
    photo(&f.photos, "alice.png", RED);
    photo(&f.photos, "bob.png", BLUE);

    f.recognizer.rebuild_gallery(&f.photos)?;
    let first = std::fs::read(f.recognizer.store().path())?;
    f.recognizer.rebuild_gallery(&f.photos)?;
    let second = std::fs::read(f.recognizer.store().path())?;

    assert_eq!(first, second);
    Ok(())
}

#[test]
fn test_failed_photo_drops_previous_embedding() -> Result<()> {
    let f = fixture();
    photo(&f.photos, "alice.png", RED);
    photo(&f.photos, "bob.png", BLUE);
    f.recognizer.rebuild_gallery(&f.photos)?;

    photo(&f.photos, "bob.png", BLACK);
    let failures = f.recognizer.rebuild_gallery(&f.photos)?;
    assert_eq!(failures, ["bob.png"]);

    let stored = f.recognizer.store().load()?;
    assert_eq!(stored.identities(), ["alice"]);
    Ok(())
}

#[test]
fn test_duplicate_identity_last_file_wins() -> Result<()> {
    let f = fixture();
    photo(&f.photos, "alice.png", BLUE);
    photo(&f.photos, "alice.jpeg", RED);

    // sorted: alice.jpeg, alice.png
    f.recognizer.rebuild_gallery(&f.photos)?;
    let gallery = f.recognizer.gallery()?;
    assert_eq!(gallery.len(), 1);
    let e = gallery.get("alice").unwrap();
    assert!(e[2] > 0.9 && e[0] < 0.1);
    Ok(())
}

#[test]
fn test_rebuild_swaps_cache_but_not_snapshots() -> Result<()> {
    let f = fixture();
    photo(&f.photos, "alice.png", RED);
    f.recognizer.rebuild_gallery(&f.photos)?;

    let before = f.recognizer.gallery()?;
    assert!(matches!(
        f.recognizer.identify_image(&probe(BLUE))?,
        MatchResult::Unknown { .. }
    ));

    photo(&f.photos, "carol.png", BLUE);
    f.recognizer.rebuild_gallery(&f.photos)?;

    assert_eq!(before.identities(), ["alice"]);
    assert_eq!(
        f.recognizer.identify_image(&probe(BLUE))?.identity(),
        Some("carol")
    );
    Ok(())
}

#[test]
fn test_cache_is_not_reread_per_call() -> Result<()> {
    let f = fixture();
    photo(&f.photos, "alice.png", RED);
    f.recognizer.rebuild_gallery(&f.photos)?;

    // replacing the blob behind the recognizer's back is only seen after invalidation
    f.recognizer.store().save(&rollcall::Gallery::new())?;
    assert_eq!(
        f.recognizer.identify_image(&probe(RED))?.identity(),
        Some("alice")
    );

    f.recognizer.invalidate()?;
    assert_eq!(
        f.recognizer.identify_image(&probe(RED))?,
        MatchResult::NoGalleryData
    );
    Ok(())
}

#[test]
fn test_corrupt_store_fails_identify_but_not_rebuild() -> Result<()> {
    let f = fixture();
    std::fs::write(f.recognizer.store().path(), [0xff; 8])?;

    let err = f.recognizer.identify_image(&probe(RED)).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StoreError>(),
        Some(StoreError::Corrupt { .. })
    ));

    photo(&f.photos, "alice.png", RED);
    f.recognizer.rebuild_gallery(&f.photos)?;
    assert_eq!(
        f.recognizer.identify_image(&probe(RED))?.identity(),
        Some("alice")
    );
    Ok(())
}

#[test]
fn test_probe_dimension_mismatch_is_an_error() -> Result<()> {
    let f = fixture();
    let mut gallery = rollcall::Gallery::new();
    gallery.insert("alice".into(), vec![1.0, 0.0]);
    f.recognizer.store().save(&gallery)?;

    assert!(f.recognizer.identify_image(&probe(RED)).is_err());
    Ok(())
}

#[test]
fn test_rebuild_function_saves_partial_results() -> Result<()> {
    let root = tempfile::tempdir()?;
    let store = GalleryStore::new(root.path().join("rostos.bin"));
    photo(root.path(), "alice.png", RED);
    photo(root.path(), "nobody.png", BLACK);

    let mut provider = ColorProvider::default();
    let outcome = rebuild::rebuild(&store, &mut provider, root.path())?;

    assert_eq!(provider.calls, 2);
    assert_eq!(outcome.failures, ["nobody.png"]);
    assert_eq!(store.load()?, outcome.gallery);
    Ok(())
}

#[test]
fn test_missing_photo_directory_keeps_old_gallery() -> Result<()> {
    let f = fixture();
    photo(&f.photos, "alice.png", RED);
    f.recognizer.rebuild_gallery(&f.photos)?;

    assert!(f
        .recognizer
        .rebuild_gallery(&f.photos.join("missing"))
        .is_err());
    assert_eq!(f.recognizer.store().load()?.identities(), ["alice"]);
    Ok(())
}

#[test]
fn test_concurrent_identify_during_rebuild() -> Result<()> {
    let f = fixture();
    photo(&f.photos, "alice.png", RED);
    f.recognizer.rebuild_gallery(&f.photos)?;
    photo(&f.photos, "bob.png", BLUE);

    std::thread::scope(|s| {
        let readers: Vec<_> = (0..4)
            .map(|_| {
                s.spawn(|| {
                    for _ in 0..20 {
                        let result = f.recognizer.identify_image(&probe(RED)).unwrap();
                        assert_eq!(result.identity(), Some("alice"));
                    }
                })
            })
            .collect();
        for _ in 0..5 {
            f.recognizer.rebuild_gallery(&f.photos).unwrap();
        }
        for r in readers {
            r.join().unwrap();
        }
    });

    assert_eq!(f.recognizer.gallery()?.identities(), ["alice", "bob"]);
    Ok(())
}

/// `ColorProvider` that takes a while per image and counts calls across threads
struct SlowProvider {
    inner: ColorProvider,
    calls: Arc<AtomicUsize>,
}

impl EmbeddingProvider for SlowProvider {
    fn extract_embeddings(&mut self, img: &DynamicImage) -> Result<Vec<Embedding>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(40));
        self.inner.extract_embeddings(img)
    }
}

#[test]
fn test_identify_completes_while_rebuild_runs() -> Result<()> {
    env_logger::try_init().ok();
    let root = tempfile::tempdir()?;
    let photos = root.path().join("fotos");
    std::fs::create_dir(&photos)?;
    let calls = Arc::new(AtomicUsize::new(0));
    let recognizer = Recognizer::new(
        GalleryStore::new(root.path().join("rostos.bin")),
        SlowProvider {
            inner: ColorProvider::default(),
            calls: Arc::clone(&calls),
        },
        0.5,
    );

    photo(&photos, "alice.png", RED);
    recognizer.rebuild_gallery(&photos)?;
    for i in 0..12u8 {
        photo(&photos, &format!("student{:02}.png", i), [0, 20 * i + 10, 255]);
    }

    let face = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb(RED)));
    let started = calls.load(Ordering::SeqCst);
    let rebuilt = AtomicBool::new(false);
    std::thread::scope(|s| -> Result<()> {
        let worker = s.spawn(|| {
            let failures = recognizer.rebuild_gallery(&photos).unwrap();
            rebuilt.store(true, Ordering::SeqCst);
            failures
        });

        while calls.load(Ordering::SeqCst) == started {
            std::thread::yield_now();
        }
        let result = recognizer.identify_image(&face)?;
        assert_eq!(result.identity(), Some("alice"));
        assert!(!rebuilt.load(Ordering::SeqCst));

        assert!(worker.join().unwrap().is_empty());
        Ok(())
    })?;

    assert_eq!(recognizer.gallery()?.len(), 13);
    Ok(())
}
