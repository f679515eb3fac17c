use {
    base64::{Engine as _, engine::general_purpose::STANDARD},
    qrcode::{QrCode, render::unicode},
    tracing::warn,
};

/// A pairing code in every displayable form.
///
/// `terminal` and `image_base64` are best-effort: a rendering failure leaves
/// them `None` and the raw code still pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPairingCode {
    pub code: String,
    /// Unicode half-block QR art for terminal display.
    pub terminal: Option<String>,
    /// PNG data URL for embedding in a UI.
    pub image_base64: Option<String>,
}

impl RenderedPairingCode {
    /// A code with no rendered forms (phone pairing, or render failure).
    pub fn plain(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            terminal: None,
            image_base64: None,
        }
    }
}

/// Pure transform from a pairing code string to its displayable forms.
#[derive(Debug, Clone, Copy)]
pub struct PairingPresenter {
    image_size: u32,
}

impl Default for PairingPresenter {
    fn default() -> Self {
        Self { image_size: 256 }
    }
}

impl PairingPresenter {
    pub fn new(image_size: u32) -> Self {
        Self { image_size }
    }

    /// Render a QR pairing code. Never fails: on a render error the result
    /// degrades to the bare code string.
    pub fn render(&self, code: &str) -> RenderedPairingCode {
        let qr = match QrCode::new(code.as_bytes()) {
            Ok(qr) => qr,
            Err(e) => {
                warn!(error = %e, "QR encode failed, serving bare pairing code");
                return RenderedPairingCode::plain(code);
            },
        };

        let terminal = qr
            .render::<unicode::Dense1x2>()
            .quiet_zone(true)
            .build();

        RenderedPairingCode {
            code: code.to_string(),
            terminal: Some(terminal),
            image_base64: self.render_png(&qr),
        }
    }

    fn render_png(&self, qr: &QrCode) -> Option<String> {
        let img = qr
            .render::<image::Luma<u8>>()
            .min_dimensions(self.image_size, self.image_size)
            .build();

        let mut png = Vec::new();
        let mut cursor = std::io::Cursor::new(&mut png);
        if let Err(e) =
            image::DynamicImage::ImageLuma8(img).write_to(&mut cursor, image::ImageFormat::Png)
        {
            warn!(error = %e, "PNG encode failed, pairing image unavailable");
            return None;
        }
        Some(format!("data:image/png;base64,{}", STANDARD.encode(&png)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_terminal_and_image_forms() {
        let rendered = PairingPresenter::default().render("2@AbCdEfGh123456,xyz==");
        assert_eq!(rendered.code, "2@AbCdEfGh123456,xyz==");

        let art = rendered.terminal.unwrap();
        assert!(!art.is_empty());
        // Half-block renderer output is multi-line.
        assert!(art.lines().count() > 10);

        let url = rendered.image_base64.unwrap();
        assert!(url.starts_with("data:image/png;base64,"));
    }

    #[test]
    fn plain_has_no_rendered_forms() {
        let rendered = RenderedPairingCode::plain("ABCD-1234");
        assert!(rendered.terminal.is_none());
        assert!(rendered.image_base64.is_none());
    }

    #[test]
    fn rendering_is_deterministic() {
        let presenter = PairingPresenter::new(128);
        assert_eq!(presenter.render("same-code"), presenter.render("same-code"));
    }
}
