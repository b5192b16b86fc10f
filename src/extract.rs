//! Audio ingestion.
//!
//! Sources are handed to an external `ffmpeg` process that converts
//! them to 16-bit mono PCM WAV at the configured sample rate. The
//! converted audio lands in a temporary file that is removed as soon
//! as the samples are in memory.

use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};

use hound::{SampleFormat, WavReader};
use thiserror::Error;

/// Result alias for sample extraction.
pub type Result<T> = std::result::Result<T, ExtractError>;

/// Errors raised while pulling samples out of an audio source.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// No temporary file for the converted audio could be created.
    #[error("failed to create a temporary file for converted audio: {0}")]
    TempFile(#[source] std::io::Error),
    /// The converter process did not start.
    #[error("failed to start ffmpeg: {0}")]
    ConversionStart(#[source] std::io::Error),
    /// The converter process could not be waited on.
    #[error("failed to wait for ffmpeg: {0}")]
    ConversionWait(#[source] std::io::Error),
    /// The converter exited with a failure status.
    #[error("ffmpeg exited with {status}: {stderr}")]
    ConversionFailed {
        /// Exit status of the converter process.
        status: ExitStatus,
        /// Last lines the converter wrote to stderr.
        stderr: String,
    },
    /// The converted file could not be opened as WAV.
    #[error("failed to open converted audio: {0}")]
    ConvertedOpen(#[source] hound::Error),
    /// The converted file is not integer 16-bit mono PCM at the
    /// expected rate.
    #[error(
        "converted audio has {channels} channel(s) of {bits}-bit samples at {rate} Hz \
         where 16-bit mono at {expected_rate} Hz was expected"
    )]
    ConvertedFormat {
        /// Channels found in the converted file.
        channels: u16,
        /// Bits per sample found in the converted file.
        bits: u16,
        /// Sample rate found in the converted file.
        rate: u32,
        /// Sample rate the extractor was configured for.
        expected_rate: u32,
    },
    /// Samples could not be read from the converted file.
    #[error("failed to read converted audio: {0}")]
    ConvertedRead(#[source] hound::Error),
}

/// Converts audio sources into mono sample buffers via `ffmpeg`.
#[derive(Debug, Clone)]
pub struct SampleExtractor {
    sample_rate: u32,
}

impl SampleExtractor {
    /// Create an extractor that resamples everything to `sample_rate`.
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }

    /// The sample rate this extractor converts to.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Extract samples from `source`, keeping at most `duration`
    /// seconds of audio when a cap is given.
    pub fn extract(&self, source: &Path, duration: Option<u32>) -> Result<Vec<i16>> {
        let converted = tempfile::Builder::new()
            .suffix(".wav")
            .tempfile()
            .map_err(ExtractError::TempFile)?;

        let output = self
            .command(source, converted.path(), duration)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(ExtractError::ConversionStart)?
            .wait_with_output()
            .map_err(ExtractError::ConversionWait)?;
        if !output.status.success() {
            return Err(ExtractError::ConversionFailed {
                status: output.status,
                stderr: stderr_tail(&output.stderr),
            });
        }

        self.read_converted(converted.path())
    }

    fn command(&self, source: &Path, target: &Path, duration: Option<u32>) -> Command {
        let mut command = Command::new("ffmpeg");
        command
            .arg("-i")
            .arg(source)
            .arg("-vn")
            .args(["-acodec", "pcm_s16le"])
            .args(["-ac", "1"])
            .arg("-ar")
            .arg(self.sample_rate.to_string())
            .arg("-y");
        if let Some(seconds) = duration {
            command.arg("-t").arg(seconds.to_string());
        }
        command.arg(target);
        command
    }

    fn read_converted(&self, path: &Path) -> Result<Vec<i16>> {
        let mut reader = WavReader::open(path).map_err(ExtractError::ConvertedOpen)?;
        let spec = reader.spec();
        if spec.channels != 1
            || spec.bits_per_sample != 16
            || spec.sample_format != SampleFormat::Int
            || spec.sample_rate != self.sample_rate
        {
            return Err(ExtractError::ConvertedFormat {
                channels: spec.channels,
                bits: spec.bits_per_sample,
                rate: spec.sample_rate,
                expected_rate: self.sample_rate,
            });
        }
        reader
            .samples::<i16>()
            .collect::<std::result::Result<Vec<i16>, _>>()
            .map_err(ExtractError::ConvertedRead)
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let mut lines: Vec<&str> = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .collect();
    let tail = lines.split_off(lines.len().saturating_sub(4));
    tail.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;

    #[test]
    fn command_lists_conversion_flags_in_order() {
        let extractor = SampleExtractor::new(5512);
        let command = extractor.command(Path::new("in.mp3"), Path::new("out.wav"), Some(60));

        assert_eq!(command.get_program(), "ffmpeg");
        let args: Vec<&OsStr> = command.get_args().collect();
        let expected = [
            "-i", "in.mp3", "-vn", "-acodec", "pcm_s16le", "-ac", "1", "-ar", "5512", "-y",
            "-t", "60", "out.wav",
        ];
        let expected: Vec<&OsStr> = expected.iter().map(OsStr::new).collect();
        assert_eq!(args, expected);
    }

    #[test]
    fn duration_cap_is_optional() {
        let extractor = SampleExtractor::new(5512);
        let command = extractor.command(Path::new("in.mp3"), Path::new("out.wav"), None);

        let args: Vec<&OsStr> = command.get_args().collect();
        assert!(!args.contains(&OsStr::new("-t")));
    }

    #[test]
    fn converted_wav_reads_back_as_samples() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("converted.wav");
        let samples: Vec<i16> = vec![0, 1000, -1000, i16::MAX, i16::MIN];
        write_wav(&path, 5512, 1, &samples);

        let extractor = SampleExtractor::new(5512);
        let read = extractor.read_converted(&path).expect("well-formed wav");
        assert_eq!(read, samples);
    }

    #[test]
    fn unexpected_sample_rate_is_rejected() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("converted.wav");
        write_wav(&path, 8000, 1, &[0, 1, 2]);

        let extractor = SampleExtractor::new(5512);
        match extractor.read_converted(&path) {
            Err(ExtractError::ConvertedFormat {
                rate,
                expected_rate,
                ..
            }) => {
                assert_eq!(rate, 8000);
                assert_eq!(expected_rate, 5512);
            }
            other => panic!("expected a format error, got {other:?}"),
        }
    }

    #[test]
    fn stereo_output_is_rejected() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("converted.wav");
        write_wav(&path, 5512, 2, &[0, 0, 1, 1]);

        let extractor = SampleExtractor::new(5512);
        assert!(matches!(
            extractor.read_converted(&path),
            Err(ExtractError::ConvertedFormat { channels: 2, .. })
        ));
    }

    #[test]
    fn non_wav_output_is_an_open_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("converted.wav");
        std::fs::write(&path, "definitely not audio").expect("write bogus file");

        let extractor = SampleExtractor::new(5512);
        assert!(matches!(
            extractor.read_converted(&path),
            Err(ExtractError::ConvertedOpen(_))
        ));
    }

    fn write_wav(path: &Path, sample_rate: u32, channels: u16, samples: &[i16]) {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).expect("create wav");
        for &sample in samples {
            writer.write_sample(sample).expect("write sample");
        }
        writer.finalize().expect("finalize wav");
    }
}
