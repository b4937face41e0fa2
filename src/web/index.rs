//! Index page rendering

use std::collections::BTreeMap;
use std::fmt::Write;

use crate::video::SessionInfo;

/// Values shown on the index page
pub struct IndexPage<'a> {
    pub title: &'a str,
    pub devices: &'a BTreeMap<u32, String>,
    pub session: &'a SessionInfo,
    pub quality: u32,
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

const STYLE: &str = r#"
* { margin: 0; padding: 0; box-sizing: border-box; }
body {
    background: linear-gradient(135deg, #3a6186 0%, #89253e 100%);
    font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
    color: #fff; min-height: 100vh; display: flex;
    align-items: center; justify-content: center; padding: 20px;
}
.container {
    background: rgba(255, 255, 255, 0.1); border-radius: 20px; padding: 32px;
    border: 1px solid rgba(255, 255, 255, 0.2); text-align: center;
    max-width: 95vw; max-height: 95vh; overflow-y: auto;
}
h1 { font-size: 2.5rem; margin-bottom: 24px; }
.controls { margin-bottom: 20px; }
select {
    background: rgba(255, 255, 255, 0.2); border: 2px solid rgba(255, 255, 255, 0.3);
    color: #fff; padding: 8px 14px; border-radius: 16px; min-width: 200px;
}
option { color: #000; }
.stats { margin-bottom: 20px; padding: 12px; border-radius: 12px; background: rgba(255, 255, 255, 0.05); }
.video { position: relative; background: #000; border-radius: 16px; overflow: hidden; margin-bottom: 20px; }
.live {
    position: absolute; top: 16px; left: 16px; background: #e84148;
    padding: 6px 14px; border-radius: 14px; font-weight: bold; font-size: 0.85rem;
}
#stream { width: 100%; height: auto; display: block; max-height: 60vh; object-fit: contain; }
.actions { display: flex; gap: 12px; justify-content: center; flex-wrap: wrap; }
.btn {
    background: rgba(255, 255, 255, 0.2); border: 2px solid rgba(255, 255, 255, 0.3);
    color: #fff; padding: 10px 22px; border-radius: 24px; cursor: pointer; font-weight: 600;
}
.btn:hover { background: rgba(255, 255, 255, 0.3); }
@media (max-width: 768px) { .container { padding: 16px; } h1 { font-size: 1.8rem; } #stream { max-height: 40vh; } }
"#;

const SCRIPT: &str = r#"
function switchCamera() {
    const id = document.getElementById('cameraSelect').value;
    fetch('/api/camera?id=' + id).then(response => {
        if (response.ok) {
            location.reload();
        } else {
            response.text().then(text => console.warn('Camera switch failed: ' + text));
        }
    });
}

function toggleFullscreen() {
    const img = document.getElementById('stream');
    if (!document.fullscreenElement) {
        img.requestFullscreen();
    } else {
        document.exitFullscreen();
    }
}

function saveSnapshot() {
    const img = document.getElementById('stream');
    const canvas = document.createElement('canvas');
    canvas.width = img.naturalWidth;
    canvas.height = img.naturalHeight;
    canvas.getContext('2d').drawImage(img, 0, 0);

    const select = document.getElementById('cameraSelect');
    const name = select.selectedOptions.length ? select.selectedOptions[0].text : 'camera';
    const link = document.createElement('a');
    link.download = name.replace(/[^a-zA-Z0-9]/g, '_') + '_'
        + new Date().toISOString().slice(0, 19).replace(/:/g, '-') + '.jpg';
    link.href = canvas.toDataURL('image/jpeg', 1.0);
    link.click();
}

document.getElementById('stream').onerror = function () {
    setTimeout(() => { this.src = '/stream.mjpg?' + Date.now(); }, 2000);
};
"#;

/// Render the index page
pub fn render(page: &IndexPage<'_>) -> String {
    let title = escape_html(page.title);
    let session = page.session;

    let mut options = String::new();
    for (id, name) in page.devices {
        let selected = if *id == session.device_id { " selected" } else { "" };
        let _ = write!(
            options,
            r#"<option value="{}"{}>{}</option>"#,
            id,
            selected,
            escape_html(name)
        );
    }

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>{title}</title>
<style>{style}</style>
</head>
<body>
<div class="container">
<h1>{title}</h1>
<div class="controls">
<label for="cameraSelect">Camera:</label>
<select id="cameraSelect" onchange="switchCamera()">{options}</select>
</div>
<div class="stats"><strong>Current:</strong> {width} &times; {height} &bull; {fps} FPS &bull; Quality {quality}% &bull; Camera {device}</div>
<div class="video">
<div class="live">LIVE</div>
<img id="stream" src="/stream.mjpg" alt="Live camera stream">
</div>
<div class="actions">
<button class="btn" onclick="toggleFullscreen()">Fullscreen</button>
<button class="btn" onclick="saveSnapshot()">Snapshot</button>
<button class="btn" onclick="location.reload()">Refresh</button>
</div>
</div>
<script>{script}</script>
</body>
</html>"#,
        title = title,
        style = STYLE,
        options = options,
        width = session.width,
        height = session.height,
        fps = session.fps,
        quality = page.quality,
        device = session.device_id,
        script = SCRIPT,
    )
}
