//! `NvimHandler`: the nvim-rs `Handler` implementation that receives Neovim
//! redraw and custom RPC notifications and writes them into the shared grid.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use nvim_rs::{compat::tokio::Compat, Handler, Neovim};
use rmpv::Value;
use tokio::{process::ChildStdin, sync::{Mutex, Notify}};
use tracing::debug;

use super::grid::{Cell, Grid, HlAttr};

/// Handles Neovim RPC notifications (redraw events).  All shared state is
/// behind `Arc<Mutex<…>>` so it can safely be read from the TUI render loop.
#[derive(Clone)]
pub struct NvimHandler {
    pub(super) grid: Arc<Mutex<Grid>>,
    pub(super) hl_attrs: Arc<Mutex<HashMap<u64, HlAttr>>>,
    pub(super) cursor_pos: Arc<Mutex<(u16, u16)>>,
    /// Fired after each `flush` event so the TUI can re-render immediately.
    pub(super) flush_notify: Arc<Notify>,
    /// Fired when Neovim sends `corvid_submit` (e.g. `:w`).
    pub(super) submit_notify: Arc<Notify>,
    /// Fired when Neovim sends `corvid_quit` (e.g. `:q` / `:qa`).
    pub(super) quit_notify: Arc<Notify>,
}

impl NvimHandler {
    pub fn new(
        grid: Arc<Mutex<Grid>>,
        hl_attrs: Arc<Mutex<HashMap<u64, HlAttr>>>,
        cursor_pos: Arc<Mutex<(u16, u16)>>,
        flush_notify: Arc<Notify>,
        submit_notify: Arc<Notify>,
        quit_notify: Arc<Notify>,
    ) -> Self {
        Self { grid, hl_attrs, cursor_pos, flush_notify, submit_notify, quit_notify }
    }

    async fn handle_redraw_event(&self, event_name: &str, args: &[Value]) {
        match event_name {
            "grid_resize"      => self.handle_grid_resize(args).await,
            "grid_clear"       => self.handle_grid_clear(args).await,
            "grid_line"        => self.handle_grid_line(args).await,
            "grid_scroll"      => self.handle_grid_scroll(args).await,
            "grid_cursor_goto" => self.handle_grid_cursor_goto(args).await,
            "hl_attr_define"   => self.handle_hl_attr_define(args).await,
            "flush" => {
                debug!("Redraw flush — notifying TUI");
                self.flush_notify.notify_one();
            }
            _ => debug!("Unhandled redraw event: {}", event_name),
        }
    }

    pub(super) async fn handle_grid_resize(&self, args: &[Value]) {
        for params_val in args {
            if let Value::Array(params) = params_val {
                if params.len() >= 3 {
                    if let (
                        Some(Value::Integer(_grid)),
                        Some(Value::Integer(width)),
                        Some(Value::Integer(height)),
                    ) = (params.first(), params.get(1), params.get(2))
                    {
                        let width  = width.as_u64().unwrap_or(80)  as usize;
                        let height = height.as_u64().unwrap_or(24) as usize;
                        debug!("Grid resize: {}x{}", width, height);
                        let mut grid = self.grid.lock().await;
                        grid.resize(width, height);
                    }
                }
            }
        }
    }

    pub(super) async fn handle_grid_clear(&self, _args: &[Value]) {
        debug!("Grid clear");
        let mut grid = self.grid.lock().await;
        grid.clear();
    }

    /// Handle `grid_scroll(grid, top, bot, left, right, rows, cols)`.
    pub(super) async fn handle_grid_scroll(&self, args: &[Value]) {
        for params in args {
            if let Value::Array(p) = params {
                if p.len() >= 6 {
                    let top   = p.get(1).and_then(|v| v.as_u64()).unwrap_or(0) as usize;
                    let bot   = p.get(2).and_then(|v| v.as_u64()).unwrap_or(0) as usize;
                    let left  = p.get(3).and_then(|v| v.as_u64()).unwrap_or(0) as usize;
                    let right = p.get(4).and_then(|v| v.as_u64()).unwrap_or(0) as usize;
                    let rows  = p.get(5).and_then(|v| v.as_i64()).unwrap_or(0);
                    debug!("grid_scroll top={top} bot={bot} rows={rows}");
                    let mut grid = self.grid.lock().await;
                    grid.scroll(top, bot, left, right, rows);
                }
            }
        }
    }

    pub(super) async fn handle_grid_line(&self, args: &[Value]) {
        for params_val in args {
            if let Value::Array(params) = params_val {
                if params.len() >= 4 {
                    let row       = params.get(1).and_then(|v| v.as_u64()).unwrap_or(0) as usize;
                    let col_start = params.get(2).and_then(|v| v.as_u64()).unwrap_or(0) as usize;
                    if let Some(Value::Array(cells)) = params.get(3) {
                        let mut grid = self.grid.lock().await;
                        let mut col = col_start;
                        let mut current_attr = 0u64;
                        for cell_data in cells {
                            if let Value::Array(cell_parts) = cell_data {
                                if let Some(Value::String(text)) = cell_parts.first() {
                                    let text_str = text.as_str().unwrap_or(" ");
                                    if let Some(Value::Integer(hl_id)) = cell_parts.get(1) {
                                        current_attr = hl_id.as_u64().unwrap_or(0);
                                    }
                                    let repeat = if let Some(Value::Integer(r)) = cell_parts.get(2) {
                                        r.as_u64().unwrap_or(1) as usize
                                    } else { 1 };
                                    for _ in 0..repeat {
                                        if col < grid.width {
                                            grid.set_cell(row, col, Cell {
                                                text: text_str.to_string(),
                                                attr_id: current_attr,
                                            });
                                            col += 1;
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    pub(super) async fn handle_grid_cursor_goto(&self, args: &[Value]) {
        for params_val in args {
            if let Value::Array(params) = params_val {
                if params.len() >= 3 {
                    if let (
                        Some(Value::Integer(_grid)),
                        Some(Value::Integer(row)),
                        Some(Value::Integer(col)),
                    ) = (params.first(), params.get(1), params.get(2))
                    {
                        let row = row.as_u64().unwrap_or(0) as u16;
                        let col = col.as_u64().unwrap_or(0) as u16;
                        let mut cursor = self.cursor_pos.lock().await;
                        *cursor = (row, col);
                    }
                }
            }
        }
    }

    pub(super) async fn handle_hl_attr_define(&self, args: &[Value]) {
        for params_val in args {
            if let Value::Array(params) = params_val {
                if params.len() >= 4 {
                    if let (
                        Some(Value::Integer(id)),
                        Some(Value::Map(rgb_attrs)),
                        _,
                        _,
                    ) = (params.first(), params.get(1), params.get(2), params.get(3))
                    {
                        let attr_id = id.as_u64().unwrap_or(0);
                        let mut attr_map = HashMap::new();
                        for (key, value) in rgb_attrs {
                            if let Value::String(key_str) = key {
                                if let Some(key) = key_str.as_str() {
                                    attr_map.insert(key.to_string(), value.clone());
                                }
                            }
                        }
                        let hl_attr = HlAttr::from_map(&attr_map);
                        let mut attrs = self.hl_attrs.lock().await;
                        attrs.insert(attr_id, hl_attr);
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Handler for NvimHandler {
    type Writer = Compat<ChildStdin>;

    async fn handle_request(
        &self,
        _name: String,
        _args: Vec<Value>,
        _neovim: Neovim<Self::Writer>,
    ) -> Result<Value, Value> {
        Ok(Value::from("ok"))
    }

    async fn handle_notify(
        &self,
        name: String,
        args: Vec<Value>,
        _neovim: Neovim<Self::Writer>,
    ) {
        if name == "redraw" {
            for event_batch in args {
                if let Value::Array(events) = event_batch {
                    if let Some(Value::String(event_name)) = events.first() {
                        if let Some(event_name_str) = event_name.as_str() {
                            self.handle_redraw_event(event_name_str, &events[1..]).await;
                        }
                    }
                }
            }
        } else if name == "corvid_submit" {
            debug!("Received corvid_submit notification from Neovim");
            self.submit_notify.notify_one();
        } else if name == "corvid_quit" {
            debug!("Received corvid_quit notification from Neovim");
            self.quit_notify.notify_one();
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
