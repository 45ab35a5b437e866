//! Embedded HTML templates for the bridge pages.
//!
//! Defined as `&str` constants and rendered via minijinja. Dark theme with
//! inline CSS -- no external assets required.

/// Terminal error screen.
///
/// Always offers two recovery actions: a full reload of the bridge request
/// and a link back to the platform home page.
pub const ERROR: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>Connection Failed - Gatewayz</title>
    <style>
        :root {
            --bg-primary: #0f1117;
            --bg-secondary: #1a1d27;
            --border: #2e3245;
            --text-primary: #e1e4ed;
            --text-secondary: #8b8fa3;
            --accent: #6366f1;
            --accent-hover: #818cf8;
            --danger: #ef4444;
            --radius: 8px;
        }
        *, *::before, *::after { box-sizing: border-box; margin: 0; padding: 0; }
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            background: var(--bg-primary);
            color: var(--text-primary);
            display: flex;
            justify-content: center;
            align-items: center;
            min-height: 100vh;
        }
        .card {
            background: var(--bg-secondary);
            border: 1px solid var(--border);
            border-radius: var(--radius);
            padding: 2.5rem;
            max-width: 420px;
            text-align: center;
        }
        .error-icon { font-size: 3rem; margin-bottom: 1rem; }
        h1 { color: var(--danger); font-size: 1.25rem; margin-bottom: 0.75rem; }
        p { color: var(--text-secondary); margin-bottom: 1.5rem; }
        .actions { display: flex; gap: 0.75rem; justify-content: center; }
        .btn {
            display: inline-block;
            padding: 0.5rem 1.25rem;
            border-radius: var(--radius);
            text-decoration: none;
            font-weight: 600;
        }
        .btn-primary { background: var(--accent); color: #fff; }
        .btn-primary:hover { background: var(--accent-hover); }
        .btn-secondary { border: 1px solid var(--border); color: var(--text-secondary); }
        .btn-secondary:hover { color: var(--text-primary); }
    </style>
</head>
<body>
    <div class="card">
        <div class="error-icon">&#x26A0;&#xFE0F;</div>
        <h1>Connection Failed</h1>
        <p>{{ message }}</p>
        <div class="actions">
            <a class="btn btn-primary" href="{{ retry_url }}">Try Again</a>
            <a class="btn btn-secondary" href="{{ home_url }}">Back to Gatewayz</a>
        </div>
    </div>
</body>
</html>"#;
