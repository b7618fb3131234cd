use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::fmt::Display;

/// Pixel dimensions read from an image container header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDimensions {
    pub width: u32,
    pub height: u32,
}

impl Display for ImageDimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Read image dimensions from the container header without decoding pixel
/// data. Supports PNG, JPEG and WebP (VP8 / VP8L). Returns `None` for
/// anything else; callers fall back to a default size.
pub fn sniff_dimensions(data: &[u8]) -> Option<ImageDimensions> {
    png_dimensions(data)
        .or_else(|| jpeg_dimensions(data))
        .or_else(|| webp_dimensions(data))
}

fn read_u16_be(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn read_u32_be(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset + 4)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_u16_le(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset + 2)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn read_u32_le(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn png_dimensions(data: &[u8]) -> Option<ImageDimensions> {
    if !data.starts_with(&[0x89, b'P', b'N', b'G']) {
        return None;
    }
    // IHDR is the first chunk: width/height at fixed offsets
    Some(ImageDimensions {
        width: read_u32_be(data, 16)?,
        height: read_u32_be(data, 20)?,
    })
}

fn jpeg_dimensions(data: &[u8]) -> Option<ImageDimensions> {
    if !data.starts_with(&[0xFF, 0xD8]) {
        return None;
    }
    const SOF_MARKERS: [u8; 13] = [
        0xC0, 0xC1, 0xC2, 0xC3, 0xC5, 0xC6, 0xC7, 0xC9, 0xCA, 0xCB, 0xCD, 0xCE, 0xCF,
    ];
    let mut offset = 2;
    while offset + 1 < data.len() {
        if data[offset] != 0xFF {
            return None;
        }
        let marker = data[offset + 1];
        if SOF_MARKERS.contains(&marker) {
            // SOF segment: length(2) precision(1) height(2) width(2)
            return Some(ImageDimensions {
                width: u32::from(read_u16_be(data, offset + 7)?),
                height: u32::from(read_u16_be(data, offset + 5)?),
            });
        }
        let segment_len = usize::from(read_u16_be(data, offset + 2)?);
        offset += 2 + segment_len;
    }
    None
}

fn webp_dimensions(data: &[u8]) -> Option<ImageDimensions> {
    if !data.starts_with(b"RIFF") || data.get(8..12)? != b"WEBP" {
        return None;
    }
    let mut offset = 12;
    while offset + 8 <= data.len() {
        let chunk_type = data.get(offset..offset + 4)?;
        let chunk_size = read_u32_le(data, offset + 4)? as usize;
        match chunk_type {
            b"VP8 " => {
                // lossy bitstream: dimensions follow the 3-byte frame tag
                // and the 3-byte start code
                return Some(ImageDimensions {
                    width: u32::from(read_u16_le(data, offset + 8 + 6)? & 0x3FFF),
                    height: u32::from(read_u16_le(data, offset + 8 + 8)? & 0x3FFF),
                });
            }
            b"VP8L" => {
                // lossless bitstream: signature byte then 14-bit fields
                if data.get(offset + 8)? != &0x2F {
                    return None;
                }
                let bits = read_u32_le(data, offset + 9)?;
                return Some(ImageDimensions {
                    width: (bits & 0x3FFF) + 1,
                    height: ((bits >> 14) & 0x3FFF) + 1,
                });
            }
            _ => {
                let advance = chunk_size.checked_add(chunk_size % 2)?.checked_add(8)?;
                offset = offset.checked_add(advance)?;
            }
        }
    }
    None
}

/// Decode the payload of a `data:` URL. Returns the MIME type and raw bytes.
pub fn decode_data_url(url: &str) -> Option<(String, Vec<u8>)> {
    let rest = url.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let mime = header.strip_suffix(";base64")?;
    let bytes = BASE64.decode(payload.trim()).ok()?;
    Some((mime.to_string(), bytes))
}

/// Encode raw bytes as a base64 `data:` URL, the form the provider accepts
/// for image references.
pub fn to_data_url(mime: &str, data: &[u8]) -> String {
    format!("data:{};base64,{}", mime, BASE64.encode(data))
}

/// Guess the image MIME type from magic bytes, defaulting to PNG.
pub fn guess_mime(data: &[u8]) -> &'static str {
    if data.starts_with(&[0xFF, 0xD8]) {
        "image/jpeg"
    } else if data.starts_with(b"RIFF") {
        "image/webp"
    } else {
        "image/png"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let mut data = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        data.extend_from_slice(&13u32.to_be_bytes());
        data.extend_from_slice(b"IHDR");
        data.extend_from_slice(&width.to_be_bytes());
        data.extend_from_slice(&height.to_be_bytes());
        data.extend_from_slice(&[8, 6, 0, 0, 0]);
        data
    }

    fn jpeg_bytes(width: u16, height: u16) -> Vec<u8> {
        let mut data = vec![0xFF, 0xD8];
        // APP0 segment before the SOF0 frame header
        data.extend_from_slice(&[0xFF, 0xE0, 0x00, 0x04, 0x00, 0x00]);
        data.extend_from_slice(&[0xFF, 0xC0, 0x00, 0x11, 0x08]);
        data.extend_from_slice(&height.to_be_bytes());
        data.extend_from_slice(&width.to_be_bytes());
        data.extend_from_slice(&[0x03, 0x01, 0x22, 0x00, 0x02, 0x11, 0x01, 0x03, 0x11, 0x01]);
        data
    }

    fn webp_lossless_bytes(width: u32, height: u32) -> Vec<u8> {
        let bits = (width - 1) | ((height - 1) << 14);
        let mut data = b"RIFF".to_vec();
        data.extend_from_slice(&20u32.to_le_bytes());
        data.extend_from_slice(b"WEBP");
        data.extend_from_slice(b"VP8L");
        data.extend_from_slice(&5u32.to_le_bytes());
        data.push(0x2F);
        data.extend_from_slice(&bits.to_le_bytes());
        data
    }

    #[test]
    fn test_png_dimensions() {
        let dims = sniff_dimensions(&png_bytes(640, 480)).unwrap();
        assert_eq!(dims, ImageDimensions { width: 640, height: 480 });
        assert_eq!(dims.to_string(), "640x480");
    }

    #[test]
    fn test_jpeg_dimensions() {
        let dims = sniff_dimensions(&jpeg_bytes(1024, 768)).unwrap();
        assert_eq!(dims, ImageDimensions { width: 1024, height: 768 });
    }

    #[test]
    fn test_webp_lossless_dimensions() {
        let dims = sniff_dimensions(&webp_lossless_bytes(800, 600)).unwrap();
        assert_eq!(dims, ImageDimensions { width: 800, height: 600 });
    }

    #[test]
    fn test_unknown_container() {
        assert_eq!(sniff_dimensions(b"not an image"), None);
        assert_eq!(sniff_dimensions(&[]), None);
    }

    #[test]
    fn test_truncated_png() {
        let mut data = png_bytes(640, 480);
        data.truncate(18);
        assert_eq!(sniff_dimensions(&data), None);
    }

    #[test]
    fn test_data_url_round_trip() {
        let bytes = png_bytes(12, 34);
        let url = to_data_url("image/png", &bytes);
        let (mime, decoded) = decode_data_url(&url).unwrap();
        assert_eq!(mime, "image/png");
        assert_eq!(decoded, bytes);
    }

    #[test]
    fn test_decode_rejects_non_data_url() {
        assert!(decode_data_url("https://example.com/cat.png").is_none());
        assert!(decode_data_url("data:image/png,no-base64-marker").is_none());
    }

    #[test]
    fn test_guess_mime() {
        assert_eq!(guess_mime(&png_bytes(1, 1)), "image/png");
        assert_eq!(guess_mime(&[0xFF, 0xD8, 0xFF]), "image/jpeg");
        assert_eq!(guess_mime(b"RIFFxxxxWEBP"), "image/webp");
    }
}
