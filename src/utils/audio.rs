use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::io::Cursor;

pub const WAV_MIME: &str = "audio/wav";

/// Wraps raw little-endian 16-bit PCM in a WAV container.
pub fn pcm_to_wav(pcm: &[u8], sample_rate: u32, channels: u16) -> Result<Vec<u8>> {
    if pcm.len() % 2 != 0 {
        return Err(anyhow!("PCM payload has odd length {}", pcm.len()));
    }
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut out = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut out, spec)?;
        for pair in pcm.chunks_exact(2) {
            writer.write_sample(i16::from_le_bytes([pair[0], pair[1]]))?;
        }
        writer.finalize()?;
    }
    Ok(out.into_inner())
}

/// Concatenates WAV files sharing one format into a single WAV.
pub fn merge_wav(inputs: &[Vec<u8>]) -> Result<Vec<u8>> {
    let first = inputs.first().ok_or_else(|| anyhow!("Nothing to merge"))?;
    let spec = hound::WavReader::new(Cursor::new(first))?.spec();
    if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
        return Err(anyhow!("Only 16-bit PCM WAV can be merged, got {:?}", spec));
    }

    let mut out = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut out, spec)?;
        for (i, input) in inputs.iter().enumerate() {
            let mut reader = hound::WavReader::new(Cursor::new(input))
                .with_context(|| format!("Input {} is not a WAV file", i))?;
            if reader.spec() != spec {
                return Err(anyhow!(
                    "Input {} has format {:?}, expected {:?}",
                    i,
                    reader.spec(),
                    spec
                ));
            }
            for sample in reader.samples::<i16>() {
                writer.write_sample(sample?)?;
            }
        }
        writer.finalize()?;
    }
    Ok(out.into_inner())
}

pub fn to_data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

/// Returns the mime type and decoded payload of a base64 `data:` URI.
pub fn decode_data_uri(uri: &str) -> Result<(String, Vec<u8>)> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| anyhow!("Not a data URI"))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| anyhow!("Data URI has no payload"))?;
    let mime = meta
        .strip_suffix(";base64")
        .ok_or_else(|| anyhow!("Only base64 data URIs are supported"))?;
    let bytes = STANDARD
        .decode(payload)
        .context("Data URI payload is not valid base64")?;
    Ok((mime.to_string(), bytes))
}
