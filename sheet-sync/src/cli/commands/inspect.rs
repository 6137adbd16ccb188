//! Read-only diagnostics: header discovery and raw preview

use anyhow::Result;
use clap::Args;

use crate::cli::{Session, output};
use crate::patch::{SearchWindow, SheetEditor};

#[derive(Args, Debug)]
pub struct HeadersArgs {
    /// Sheet name
    #[arg(long, short)]
    pub sheet: String,

    /// Rows scanned for the header (default from config)
    #[arg(long)]
    pub rows: Option<u32>,

    /// Columns scanned for the header (default from config)
    #[arg(long)]
    pub cols: Option<u32>,
}

#[derive(Args, Debug)]
pub struct PreviewArgs {
    /// Sheet name
    #[arg(long, short)]
    pub sheet: String,

    #[arg(long, default_value_t = 5)]
    pub rows: u32,

    #[arg(long, default_value_t = 21)]
    pub cols: u32,
}

async fn open_editor(session: &Session) -> Result<SheetEditor> {
    let (_, workbook, _) = session.orchestrator.fetch(&session.target).await?;
    Ok(SheetEditor::new(
        workbook,
        session.config.key_aliases(),
        session.config.batch_options(),
    ))
}

pub async fn handle_headers(session: &Session, args: HeadersArgs) -> Result<bool> {
    let editor = open_editor(session).await?;
    let defaults = session.config.search_window();
    let window = SearchWindow {
        max_rows: args.rows.unwrap_or(defaults.max_rows),
        max_cols: args.cols.unwrap_or(defaults.max_cols),
    };

    let description = editor.describe_headers(&args.sheet, window)?;
    output::print_headers(&description, session.format)?;
    Ok(true)
}

pub async fn handle_preview(session: &Session, args: PreviewArgs) -> Result<bool> {
    let editor = open_editor(session).await?;
    let rows = editor.preview_rows(&args.sheet, args.rows, args.cols)?;
    output::print_preview(&args.sheet, &rows, session.format)?;
    Ok(true)
}
