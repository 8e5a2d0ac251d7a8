//! Output sinks and the loop that drains the screenshot stream into them.
//!
//! The pipeline is format-agnostic: a sink receives raw per-frame image
//! bytes together with a monotonically increasing index.

use crate::pipeline::{Frame, FrameStream};
use crate::{Error, Result};
use async_trait::async_trait;
use image::{ImageFormat, ImageReader};
use log::{debug, info, warn};
use std::io::{BufWriter, Cursor, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;

/// Sequential writer for captured frames.
#[async_trait]
pub trait FrameSink: Send {
    /// Store one frame. Called in increasing `index` order.
    fn accept(&mut self, index: u64, data: &[u8]) -> Result<()>;

    /// Called once after the last frame.
    async fn finish(&mut self) -> Result<()>;
}

#[async_trait]
impl<T: FrameSink + ?Sized> FrameSink for Box<T> {
    fn accept(&mut self, index: u64, data: &[u8]) -> Result<()> {
        (**self).accept(index, data)
    }

    async fn finish(&mut self) -> Result<()> {
        (**self).finish().await
    }
}

/// Pull every frame from `stream` into `sink`, then finish the sink.
///
/// Any error stops draining; the stream is dropped, which releases a
/// producer blocked on it. Returns the number of frames written.
pub async fn drain<S: FrameSink + ?Sized>(mut stream: FrameStream, sink: &mut S) -> Result<u64> {
    let mut written = 0;
    while let Some(frame) = stream.next_frame().await {
        let frame = frame?;
        sink.accept(frame.index, &frame.data)?;
        written += 1;
    }
    sink.finish().await?;
    debug!("sink drained {} frames", written);
    Ok(written)
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}

/// Intermediate frame directory for a GIF at `path`: `tmp_path` when given,
/// otherwise `<dir>/.frames-<name>`.
fn frames_dir_for(path: &Path, tmp_path: Option<&Path>) -> PathBuf {
    match tmp_path {
        Some(tmp) => absolute(tmp),
        None => {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "output".to_string());
            path.parent()
                .unwrap_or_else(|| Path::new("."))
                .join(format!(".frames-{}", name))
        }
    }
}

fn remove_frames(dir: &Path, keep: bool) {
    if keep {
        return;
    }
    if let Err(e) = std::fs::remove_dir_all(dir) {
        warn!("failed to remove '{}': {}", dir.display(), e);
    }
}

fn create_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) => std::fs::create_dir_all(parent),
        None => Ok(()),
    }
}

/// Collects frames in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub frames: Vec<Frame>,
    pub finished: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FrameSink for MemorySink {
    fn accept(&mut self, index: u64, data: &[u8]) -> Result<()> {
        self.frames.push(Frame {
            index,
            data: data.to_vec(),
        });
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        self.finished = true;
        Ok(())
    }
}

/// Writes each frame to `<dir>/<index>.png`.
///
/// The directory is created on the first frame.
#[derive(Debug)]
pub struct FsSink {
    dir: PathBuf,
    dir_initialized: bool,
    written: u64,
}

impl FsSink {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        let dir = absolute(dir.as_ref());
        debug!("frames directory: {}", dir.display());
        Self {
            dir,
            dir_initialized: false,
            written: 0,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn frame_path(&self, index: u64) -> PathBuf {
        self.dir.join(format!("{}.png", index))
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

#[async_trait]
impl FrameSink for FsSink {
    fn accept(&mut self, index: u64, data: &[u8]) -> Result<()> {
        if !self.dir_initialized {
            std::fs::create_dir_all(&self.dir).map_err(|e| Error::WriteError {
                index,
                reason: format!("failed to create '{}': {}", self.dir.display(), e),
            })?;
            self.dir_initialized = true;
        }

        let path = self.frame_path(index);
        std::fs::write(&path, data).map_err(|e| Error::WriteError {
            index,
            reason: format!("failed to write '{}': {}", path.display(), e),
        })?;
        self.written += 1;
        debug!("frame {} saved to {}", index, path.display());
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        info!("all {} frames saved to {}", self.written, self.dir.display());
        Ok(())
    }
}

/// Options for [`GifskiSink`].
#[derive(Debug, Clone)]
pub struct GifskiOptions {
    /// Output GIF file
    pub path: PathBuf,
    /// Directory for intermediate frames (default `<dir>/.frames-<name>`)
    pub tmp_path: Option<PathBuf>,
    pub fps: Option<f64>,
    /// 1-100
    pub quality: Option<u8>,
    /// Play once instead of looping
    pub once: bool,
    pub fast: bool,
    /// Keep the intermediate frames after encoding
    pub keep_frames: bool,
}

impl GifskiOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            tmp_path: None,
            fps: None,
            quality: None,
            once: false,
            fast: false,
            keep_frames: false,
        }
    }
}

/// Stores frames in a temporary directory and encodes them with the external
/// `gifski` binary when the pass finishes.
pub struct GifskiSink {
    options: GifskiOptions,
    path: PathBuf,
    frames: FsSink,
}

impl GifskiSink {
    pub fn new(options: GifskiOptions) -> Self {
        let path = absolute(&options.path);
        let tmp = frames_dir_for(&path, options.tmp_path.as_deref());
        debug!("gif output path: {}, frames path: {}", path.display(), tmp.display());

        Self {
            options,
            path,
            frames: FsSink::new(tmp),
        }
    }

    pub fn output_path(&self) -> &Path {
        &self.path
    }

    pub fn frames_dir(&self) -> &Path {
        self.frames.dir()
    }

    /// Arguments passed to `gifski`, frame files last in index order.
    pub fn command_args(&self) -> Vec<String> {
        let mut args = vec!["-o".to_string(), self.path.display().to_string()];
        if let Some(fps) = self.options.fps {
            args.push(format!("--fps={}", fps));
        }
        if self.options.once {
            args.push("--once".to_string());
        }
        if let Some(quality) = self.options.quality {
            args.push(format!("--quality={}", quality));
        }
        if self.options.fast {
            args.push("--fast".to_string());
        }
        for index in 1..=self.frames.written() {
            args.push(format!("{}.png", index));
        }
        args
    }
}

#[async_trait]
impl FrameSink for GifskiSink {
    fn accept(&mut self, index: u64, data: &[u8]) -> Result<()> {
        self.frames.accept(index, data)
    }

    async fn finish(&mut self) -> Result<()> {
        if self.frames.written() == 0 {
            return Err(Error::FinalizeError("no frames were captured".into()));
        }

        create_parent(&self.path).map_err(|e| {
            Error::FinalizeError(format!("failed to create parent of '{}': {}", self.path.display(), e))
        })?;

        let status = tokio::process::Command::new("gifski")
            .args(self.command_args())
            .current_dir(self.frames.dir())
            .stdout(Stdio::null())
            .status()
            .await
            .map_err(|e| {
                Error::FinalizeError(format!("failed to run gifski (is it installed and on PATH?): {}", e))
            })?;

        if !status.success() {
            return Err(Error::FinalizeError(format!("gifski exited with {}", status)));
        }

        remove_frames(self.frames.dir(), self.options.keep_frames);
        info!("output file: {}", self.path.display());
        Ok(())
    }
}

/// Options for [`GifSink`].
#[derive(Debug, Clone)]
pub struct GifOptions {
    /// Output GIF file
    pub path: PathBuf,
    /// Directory for intermediate frames (default `<dir>/.frames-<name>`)
    pub tmp_path: Option<PathBuf>,
    pub fps: Option<f64>,
    /// Palette sampling factor, 1 (best) to 30 (fastest). Default 10.
    pub quality: Option<i32>,
    /// Loop forever; `false` plays the animation once
    pub repeat: bool,
    /// Keep the intermediate frames after encoding
    pub keep_frames: bool,
}

impl GifOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            tmp_path: None,
            fps: None,
            quality: None,
            repeat: true,
            keep_frames: false,
        }
    }
}

const DEFAULT_GIF_QUALITY: i32 = 10;

/// Stores frames in a temporary directory and encodes them into a GIF
/// in-process when the pass finishes.
///
/// The GIF takes its size from the first frame; every later frame must
/// match it.
pub struct GifSink {
    options: GifOptions,
    path: PathBuf,
    frames: FsSink,
    size: Option<(u16, u16)>,
}

impl GifSink {
    pub fn new(options: GifOptions) -> Self {
        let path = absolute(&options.path);
        let tmp = frames_dir_for(&path, options.tmp_path.as_deref());
        debug!("gif output path: {}, frames path: {}", path.display(), tmp.display());

        Self {
            options,
            path,
            frames: FsSink::new(tmp),
            size: None,
        }
    }

    pub fn output_path(&self) -> &Path {
        &self.path
    }

    pub fn frames_dir(&self) -> &Path {
        self.frames.dir()
    }

    /// Width and height taken from the first frame.
    pub fn size(&self) -> Option<(u16, u16)> {
        self.size
    }

    /// Per-frame delay in hundredths of a second (0 when no fps is set).
    pub fn frame_delay(&self) -> u16 {
        match self.options.fps {
            Some(fps) if fps > 0.0 => (100.0 / fps).round().clamp(1.0, u16::MAX as f64) as u16,
            _ => 0,
        }
    }

    fn init(&self, index: u64, data: &[u8]) -> Result<(u16, u16)> {
        let write_error = |reason: String| Error::WriteError { index, reason };

        let (width, height) = ImageReader::with_format(Cursor::new(data), ImageFormat::Png)
            .into_dimensions()
            .map_err(|e| write_error(format!("not a PNG frame: {}", e)))?;
        let size = match (u16::try_from(width), u16::try_from(height)) {
            (Ok(w), Ok(h)) => (w, h),
            _ => return Err(write_error(format!("{}x{} is too large for a GIF", width, height))),
        };

        create_parent(&self.path)
            .map_err(|e| write_error(format!("failed to create parent of '{}': {}", self.path.display(), e)))?;

        debug!("gif size {}x{}", size.0, size.1);
        Ok(size)
    }
}

#[async_trait]
impl FrameSink for GifSink {
    fn accept(&mut self, index: u64, data: &[u8]) -> Result<()> {
        if self.size.is_none() {
            self.size = Some(self.init(index, data)?);
        }
        self.frames.accept(index, data)
    }

    async fn finish(&mut self) -> Result<()> {
        let (width, height) = match self.size {
            Some(size) => size,
            None => return Err(Error::FinalizeError("no frames were captured".into())),
        };

        let job = GifJob {
            frames_dir: self.frames.dir().to_path_buf(),
            path: self.path.clone(),
            width,
            height,
            delay: self.frame_delay(),
            speed: self.options.quality.unwrap_or(DEFAULT_GIF_QUALITY).clamp(1, 30),
            repeat: self.options.repeat,
        };

        let encoded = tokio::task::spawn_blocking(move || job.encode())
            .await
            .map_err(|e| Error::FinalizeError(format!("gif encoder task failed: {}", e)))??;

        remove_frames(self.frames.dir(), self.options.keep_frames);
        info!("output file: {} ({} frames)", self.path.display(), encoded);
        Ok(())
    }
}

/// Everything the encoder needs, owned so it can run on the blocking pool.
struct GifJob {
    frames_dir: PathBuf,
    path: PathBuf,
    width: u16,
    height: u16,
    delay: u16,
    speed: i32,
    repeat: bool,
}

impl GifJob {
    fn encode(self) -> Result<usize> {
        let finalize = |what: &str, e: &dyn std::fmt::Display| Error::FinalizeError(format!("{}: {}", what, e));

        let frames = frame_files(&self.frames_dir)?;
        let file = std::fs::File::create(&self.path)
            .map_err(|e| finalize(&format!("failed to create '{}'", self.path.display()), &e))?;

        let mut encoder = gif::Encoder::new(BufWriter::new(file), self.width, self.height, &[])
            .map_err(|e| finalize("failed to start gif", &e))?;
        let repeat = if self.repeat {
            gif::Repeat::Infinite
        } else {
            gif::Repeat::Finite(0)
        };
        encoder.set_repeat(repeat).map_err(|e| finalize("failed to write gif header", &e))?;

        for (index, path) in &frames {
            let data = std::fs::read(path).map_err(|e| finalize(&format!("failed to read '{}'", path.display()), &e))?;
            let rgba = image::load_from_memory_with_format(&data, ImageFormat::Png)
                .map_err(|e| finalize(&format!("failed to decode frame {}", index), &e))?
                .to_rgba8();

            if rgba.dimensions() != (self.width as u32, self.height as u32) {
                return Err(Error::FinalizeError(format!(
                    "frame {} is {}x{}, expected {}x{}",
                    index,
                    rgba.width(),
                    rgba.height(),
                    self.width,
                    self.height
                )));
            }

            let mut pixels = rgba.into_raw();
            let mut frame = gif::Frame::from_rgba_speed(self.width, self.height, &mut pixels, self.speed);
            frame.delay = self.delay;
            frame.dispose = gif::DisposalMethod::Background;
            encoder
                .write_frame(&frame)
                .map_err(|e| finalize(&format!("failed to encode frame {}", index), &e))?;
        }

        let mut writer = encoder.into_inner().map_err(|e| finalize("failed to finish gif", &e))?;
        writer.flush().map_err(|e| finalize("failed to flush gif", &e))?;
        Ok(frames.len())
    }
}

/// `<index>.png` files in `dir`, sorted by index. Other files are ignored.
fn frame_files(dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| Error::FinalizeError(format!("failed to list '{}': {}", dir.display(), e)))?;

    let mut frames = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| Error::FinalizeError(format!("failed to list '{}': {}", dir.display(), e)))?
            .path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("png") {
            continue;
        }
        let index = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| stem.parse::<u64>().ok());
        if let Some(index) = index {
            frames.push((index, path));
        }
    }
    frames.sort_by_key(|(index, _)| *index);
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("animcap-sink-{}-{}", name, std::process::id()))
    }

    fn png(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(width, height, image::Rgba(rgba));
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    #[tokio::test]
    async fn fs_sink_writes_numbered_files() {
        let dir = scratch_dir("fs");
        let _ = std::fs::remove_dir_all(&dir);

        let mut sink = FsSink::new(&dir);
        assert!(!dir.exists());
        sink.accept(1, b"one").unwrap();
        sink.accept(2, b"two").unwrap();
        sink.finish().await.unwrap();

        assert_eq!(std::fs::read(dir.join("1.png")).unwrap(), b"one");
        assert_eq!(std::fs::read(dir.join("2.png")).unwrap(), b"two");
        assert_eq!(sink.written(), 2);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn fs_sink_reports_write_errors() {
        let file = scratch_dir("not-a-dir");
        std::fs::write(&file, b"x").unwrap();

        let mut sink = FsSink::new(file.join("frames"));
        let err = sink.accept(7, b"data").unwrap_err();
        assert!(matches!(err, Error::WriteError { index: 7, .. }));

        std::fs::remove_file(&file).unwrap();
    }

    #[test]
    fn gifski_defaults_tmp_dir_next_to_output() {
        let sink = GifskiSink::new(GifskiOptions::new("/tmp/out/anim.gif"));
        assert_eq!(sink.output_path(), Path::new("/tmp/out/anim.gif"));
        assert_eq!(sink.frames_dir(), Path::new("/tmp/out/.frames-anim.gif"));
    }

    #[test]
    fn gifski_args_list_frames_in_order() {
        let dir = scratch_dir("gif");
        let mut options = GifskiOptions::new(dir.join("anim.gif"));
        options.fps = Some(30.0);
        options.quality = Some(90);
        options.once = true;
        let mut sink = GifskiSink::new(options);

        for index in 1..=3 {
            sink.accept(index, b"png").unwrap();
        }

        let args = sink.command_args();
        assert_eq!(args[0], "-o");
        assert!(args.contains(&"--fps=30".to_string()));
        assert!(args.contains(&"--quality=90".to_string()));
        assert!(args.contains(&"--once".to_string()));
        assert!(!args.contains(&"--fast".to_string()));
        assert_eq!(&args[args.len() - 3..], ["1.png", "2.png", "3.png"]);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn gifski_without_frames_fails_to_finish() {
        let mut sink = GifskiSink::new(GifskiOptions::new(scratch_dir("empty").join("a.gif")));
        assert!(matches!(sink.finish().await, Err(Error::FinalizeError(_))));
    }

    #[tokio::test]
    async fn gif_sink_encodes_frames_in_process() {
        let dir = scratch_dir("gif-encoder");
        let _ = std::fs::remove_dir_all(&dir);

        let mut options = GifOptions::new(dir.join("out").join("anim.gif"));
        options.fps = Some(25.0);
        let mut sink = GifSink::new(options);
        assert_eq!(sink.frames_dir(), dir.join("out").join(".frames-anim.gif"));

        let colors = [[255, 0, 0, 255], [0, 255, 0, 255], [0, 0, 255, 255]];
        for (i, color) in colors.iter().enumerate() {
            sink.accept(i as u64 + 1, &png(6, 4, *color)).unwrap();
        }
        assert_eq!(sink.size(), Some((6, 4)));
        sink.finish().await.unwrap();

        let bytes = std::fs::read(dir.join("out").join("anim.gif")).unwrap();
        assert_eq!(&bytes[..6], b"GIF89a");

        let mut decoder = gif::DecodeOptions::new().read_info(Cursor::new(bytes)).unwrap();
        assert_eq!((decoder.width(), decoder.height()), (6, 4));
        let mut frames = 0;
        while let Some(frame) = decoder.read_next_frame().unwrap() {
            assert_eq!(frame.delay, 4);
            frames += 1;
        }
        assert_eq!(frames, 3);

        // intermediate frames are removed by default
        assert!(!sink.frames_dir().exists());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn gif_sink_keeps_frames_when_asked() {
        let dir = scratch_dir("gif-keep");
        let _ = std::fs::remove_dir_all(&dir);

        let mut options = GifOptions::new(dir.join("anim.gif"));
        options.tmp_path = Some(dir.join("frames"));
        options.repeat = false;
        options.keep_frames = true;
        let mut sink = GifSink::new(options);

        sink.accept(1, &png(2, 2, [0, 0, 0, 0])).unwrap();
        sink.accept(2, &png(2, 2, [9, 9, 9, 255])).unwrap();
        sink.finish().await.unwrap();

        assert!(dir.join("anim.gif").exists());
        assert!(dir.join("frames").join("2.png").exists());
        assert_eq!(sink.frame_delay(), 0);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn gif_sink_rejects_mismatched_frame_sizes() {
        let dir = scratch_dir("gif-size");
        let _ = std::fs::remove_dir_all(&dir);

        let mut sink = GifSink::new(GifOptions::new(dir.join("anim.gif")));
        sink.accept(1, &png(4, 4, [1, 2, 3, 255])).unwrap();
        sink.accept(2, &png(3, 4, [1, 2, 3, 255])).unwrap();

        let err = sink.finish().await.unwrap_err();
        assert!(matches!(err, Error::FinalizeError(ref msg) if msg.contains("frame 2 is 3x4")));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn gif_sink_rejects_non_png_frames() {
        let dir = scratch_dir("gif-not-png");
        let mut sink = GifSink::new(GifOptions::new(dir.join("anim.gif")));
        let err = sink.accept(1, b"definitely not a png").unwrap_err();
        assert!(matches!(err, Error::WriteError { index: 1, .. }));
        assert_eq!(sink.size(), None);
    }

    #[tokio::test]
    async fn gif_sink_without_frames_fails_to_finish() {
        let mut sink = GifSink::new(GifOptions::new(scratch_dir("gif-empty").join("a.gif")));
        assert!(matches!(sink.finish().await, Err(Error::FinalizeError(_))));
    }

    #[test]
    fn frame_files_sort_numerically() {
        let dir = scratch_dir("frame-files");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        for index in [10, 2, 11, 1, 9] {
            std::fs::write(dir.join(format!("{}.png", index)), b"x").unwrap();
        }
        std::fs::write(dir.join("notes.txt"), b"x").unwrap();
        std::fs::write(dir.join("cover.png"), b"x").unwrap();

        let indices: Vec<u64> = frame_files(&dir).unwrap().into_iter().map(|(i, _)| i).collect();
        assert_eq!(indices, vec![1, 2, 9, 10, 11]);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn gif_frame_delay_follows_fps() {
        let mut options = GifOptions::new("/tmp/a.gif");
        options.fps = Some(30.0);
        assert_eq!(GifSink::new(options.clone()).frame_delay(), 3);
        options.fps = Some(200.0);
        assert_eq!(GifSink::new(options).frame_delay(), 1);
    }
}
