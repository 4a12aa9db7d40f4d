//! Plain-text rendering of session snapshots.

use std::fmt::Write;

use client_core::{DeviceState, InventoryView, StatusLevel, StatusMessage};
use shared::domain::{InventoryItem, Mode, TEMPERATURE_SENSOR, WEIGHT_SENSORS};

pub fn sensor_unit(sensor: &str) -> Option<&'static str> {
    if WEIGHT_SENSORS.contains(&sensor) {
        Some("kg")
    } else if sensor == TEMPERATURE_SENSOR {
        Some("°C")
    } else {
        None
    }
}

pub fn render_state(state: &DeviceState) -> String {
    let mut out = String::new();
    match state.mode {
        Mode::Manual => {
            let _ = writeln!(out, "mode: manual (commands enabled)");
        }
        Mode::Auto { threshold } => {
            let _ = writeln!(out, "mode: auto, threshold {threshold} (commands disabled)");
        }
    }
    for (actuator, value) in &state.actuators {
        let _ = writeln!(out, "  {actuator:<12} {value}");
    }
    if state.sensors.is_empty() {
        let _ = writeln!(out, "  no sensor readings yet");
    }
    for (sensor, reading) in &state.sensors {
        match sensor_unit(sensor.as_str()) {
            Some(unit) => {
                let _ = writeln!(out, "  {sensor:<12} {reading:.1} {unit}");
            }
            None => {
                let _ = writeln!(out, "  {sensor:<12} {reading}");
            }
        }
    }
    out
}

pub fn render_item(item: &InventoryItem) -> String {
    format!("{:<20} {:>6}  {}", item.name, item.stock, item.status().label())
}

pub fn render_inventory(view: &InventoryView) -> String {
    if view.loading {
        return "loading inventory...\n".to_string();
    }
    if view.items.is_empty() {
        return "no items\n".to_string();
    }
    view.items
        .iter()
        .map(|item| render_item(item) + "\n")
        .collect()
}

pub fn render_status(message: &StatusMessage) -> String {
    match message.level {
        StatusLevel::Info => message.text.clone(),
        StatusLevel::Error => format!("error: {}", message.text),
    }
}

#[cfg(test)]
#[path = "tests/view_tests.rs"]
mod tests;
