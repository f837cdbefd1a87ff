//! Pixel format conversion
//!
//! V4L2 devices deliver packed YUYV 4:2:2; the H.264 encoder wants planar
//! I420 (YUV 4:2:0).

use crate::error::{AppError, Result};

/// YUV420P buffer with separate Y, U, V planes
pub struct Yuv420pBuffer {
    data: Vec<u8>,
    width: u32,
    height: u32,
    u_offset: usize,
    v_offset: usize,
}

impl Yuv420pBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        let y_size = (width * height) as usize;
        let uv_size = y_size / 4;

        Self {
            data: vec![0u8; yuv420p_buffer_size(width, height)],
            width,
            height,
            u_offset: y_size,
            v_offset: y_size + uv_size,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[cfg(test)]
impl Yuv420pBuffer {
    fn y_plane(&self) -> &[u8] {
        &self.data[..self.u_offset]
    }

    fn u_plane(&self) -> &[u8] {
        &self.data[self.u_offset..self.v_offset]
    }

    fn v_plane(&self) -> &[u8] {
        &self.data[self.v_offset..]
    }
}

/// YUYV → I420 converter with a reused output buffer.
///
/// Chroma is averaged over each pair of rows. Width and height must be even.
pub struct YuyvConverter {
    width: usize,
    height: usize,
    output: Yuv420pBuffer,
}

impl YuyvConverter {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(AppError::Capture(format!(
                "YUYV conversion needs even, non-zero dimensions (got {}x{})",
                width, height
            )));
        }

        Ok(Self {
            width: width as usize,
            height: height as usize,
            output: Yuv420pBuffer::new(width, height),
        })
    }

    /// Convert one frame and return the I420 output
    pub fn convert(&mut self, yuyv: &[u8]) -> Result<&Yuv420pBuffer> {
        let expected = yuyv_buffer_size(self.width as u32, self.height as u32);
        if yuyv.len() < expected {
            return Err(AppError::Capture(format!(
                "Input buffer too small: {} < {}",
                yuyv.len(),
                expected
            )));
        }

        let width = self.width;
        let y_size = width * self.height;
        let half_width = width / 2;

        let (y_plane, uv_planes) = self.output.data.split_at_mut(y_size);
        let (u_plane, v_plane) = uv_planes.split_at_mut(y_size / 4);

        for row in (0..self.height).step_by(2) {
            let src0 = row * width * 2;
            let src1 = (row + 1) * width * 2;
            let dst0 = row * width;
            let dst1 = (row + 1) * width;
            let uv_row = (row / 2) * half_width;

            for col in (0..width).step_by(2) {
                let p0 = src0 + col * 2;
                let p1 = src1 + col * 2;

                // YUYV: Y0, U, Y1, V
                y_plane[dst0 + col] = yuyv[p0];
                y_plane[dst0 + col + 1] = yuyv[p0 + 2];
                y_plane[dst1 + col] = yuyv[p1];
                y_plane[dst1 + col + 1] = yuyv[p1 + 2];

                let uv = uv_row + col / 2;
                u_plane[uv] = ((yuyv[p0 + 1] as u16 + yuyv[p1 + 1] as u16) / 2) as u8;
                v_plane[uv] = ((yuyv[p0 + 3] as u16 + yuyv[p1 + 3] as u16) / 2) as u8;
            }
        }

        Ok(&self.output)
    }
}

/// YUV420P buffer size for a resolution
pub fn yuv420p_buffer_size(width: u32, height: u32) -> usize {
    let pixels = (width * height) as usize;
    pixels + pixels / 2
}

/// YUYV buffer size for a resolution
pub fn yuyv_buffer_size(width: u32, height: u32) -> usize {
    (width * height * 2) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuv420p_buffer_creation() {
        let buffer = Yuv420pBuffer::new(1280, 720);
        assert_eq!(buffer.as_bytes().len(), yuv420p_buffer_size(1280, 720));
        assert_eq!(buffer.y_plane().len(), 1280 * 720);
        assert_eq!(buffer.u_plane().len(), 1280 * 720 / 4);
        assert_eq!(buffer.v_plane().len(), 1280 * 720 / 4);
    }

    #[test]
    fn test_yuyv_to_i420() {
        let mut converter = YuyvConverter::new(2, 2).unwrap();

        // Two rows of Y0 U Y1 V
        let yuyv = [10, 100, 20, 200, 30, 110, 40, 210];
        let out = converter.convert(&yuyv).unwrap();

        assert_eq!(out.y_plane(), &[10, 20, 30, 40]);
        assert_eq!(out.u_plane(), &[105]);
        assert_eq!(out.v_plane(), &[205]);
    }

    #[test]
    fn test_rejects_short_input_and_odd_sizes() {
        let mut converter = YuyvConverter::new(4, 4).unwrap();
        assert!(converter.convert(&[0u8; 16]).is_err());
        assert_eq!(converter.output.as_bytes().len(), 24);

        assert!(YuyvConverter::new(3, 2).is_err());
        assert!(YuyvConverter::new(0, 0).is_err());
    }
}
