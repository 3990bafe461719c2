// main.rs - window, event loop, menu and status bar around the viewer core

#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

mod arcball;
mod error;
mod loader;
mod renderer;
mod view;

use renderer::Renderer;
use view::PhotosphereView;

use winit::{
    dpi::{LogicalSize, PhysicalPosition},
    event::*,
    event_loop::{ControlFlow, EventLoop},
    window::{Fullscreen, WindowBuilder},
};

use std::path::PathBuf;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::time::Instant;

use loader::LoadResult;

const MIN_SCALE: f32 = 0.05;
const MAX_SCALE: f32 = 20.0;

fn main() {
    env_logger::init();

    let event_loop = EventLoop::new();
    let window = Arc::new(
        WindowBuilder::new()
            .with_title("Photosphere")
            .with_inner_size(LogicalSize::new(1280, 720))
            .build(&event_loop)
            .unwrap(),
    );

    let mut renderer = pollster::block_on(Renderer::new(window.clone()));
    let mut view = PhotosphereView::new();
    {
        let size = window.inner_size();
        view.on_viewport_resized(size.width, size.height);
    }

    // Interaction state
    let mut mouse_pressed = false;
    let mut cursor_pos: PhysicalPosition<f64> = PhysicalPosition::new(0.0, 0.0);
    let mut fullscreen = false;

    // FPS counter
    let mut last_frame_time = Instant::now();
    let mut frame_count = 0;
    let mut fps = 0.0;
    let mut show_fps = false;

    // Background image loading
    let mut is_loading = false;
    let mut status: Option<String> = None;
    let (tx, rx): (Sender<LoadResult>, Receiver<LoadResult>) = channel();

    event_loop.run(move |event, _, control_flow| {
        *control_flow = ControlFlow::Poll;

        // Pick up finished loads. Failures keep the current texture and only
        // show up in the status bar.
        if let Ok(result) = rx.try_recv() {
            is_loading = false;
            match result {
                Ok(image) => {
                    status = None;
                    view.set_image(image);
                }
                Err(err) => status = Some(err.to_string()),
            }
        }

        match event {
            Event::WindowEvent { event, .. } => {
                // egui gets first refusal on every event.
                let response = renderer.egui_state.on_event(&renderer.egui_ctx, &event);
                if response.consumed {
                    return;
                }

                match event {
                    WindowEvent::CloseRequested => {
                        *control_flow = ControlFlow::Exit;
                    }

                    WindowEvent::Resized(new_size) => {
                        renderer.resize(new_size);
                        view.on_viewport_resized(new_size.width, new_size.height);
                    }

                    WindowEvent::KeyboardInput { input, .. } => {
                        if input.state == ElementState::Pressed {
                            match input.virtual_keycode {
                                Some(VirtualKeyCode::O) => {
                                    if let Some(path) = pick_image_file() {
                                        is_loading = true;
                                        loader::spawn_load(path, tx.clone());
                                    }
                                }
                                Some(VirtualKeyCode::R) => view.on_reset_command(),
                                Some(VirtualKeyCode::Left) => view.on_rotate_command(-15.0),
                                Some(VirtualKeyCode::Right) => view.on_rotate_command(15.0),
                                Some(VirtualKeyCode::F11) => {
                                    fullscreen = !fullscreen;
                                    set_fullscreen(&window, fullscreen);
                                }
                                _ => {}
                            }
                        }
                    }

                    WindowEvent::MouseInput { state, button, .. } => {
                        if button == MouseButton::Left {
                            match state {
                                ElementState::Pressed => {
                                    mouse_pressed = true;
                                    view.on_drag_start(cursor_pos.x as f32, cursor_pos.y as f32);
                                }
                                ElementState::Released => {
                                    mouse_pressed = false;
                                    view.on_drag_end();
                                }
                            }
                        }
                    }

                    WindowEvent::CursorMoved { position, .. } => {
                        cursor_pos = position;
                        if mouse_pressed {
                            view.on_drag_move(position.x as f32, position.y as f32);
                        }
                    }

                    // Pointer grab gone mid-drag: abandon instead of commit.
                    WindowEvent::CursorLeft { .. } | WindowEvent::Focused(false) => {
                        if mouse_pressed {
                            mouse_pressed = false;
                            view.on_drag_cancel();
                        }
                    }

                    WindowEvent::MouseWheel { delta, .. } => {
                        let scroll = match delta {
                            MouseScrollDelta::LineDelta(_, y) => y,
                            MouseScrollDelta::PixelDelta(pos) => pos.y as f32 / 20.0,
                        };
                        let scale = view.controller.scale() * 1.1f32.powf(scroll);
                        view.set_scale(scale.clamp(MIN_SCALE, MAX_SCALE));
                    }

                    WindowEvent::DroppedFile(path) => {
                        is_loading = true;
                        loader::spawn_load(path, tx.clone());
                    }

                    _ => {}
                }
            }

            Event::RedrawRequested(_) => {
                frame_count += 1;
                let now = Instant::now();
                if now.duration_since(last_frame_time).as_secs_f32() >= 1.0 {
                    fps = frame_count as f32 / now.duration_since(last_frame_time).as_secs_f32();
                    frame_count = 0;
                    last_frame_time = now;
                }

                // Snapshot handoff, then paint.
                renderer.sync(view.snapshot());

                let mut next_image = None;
                let render_result = renderer.render_with_ui(&window, |ctx| {
                    draw_ui(
                        ctx,
                        &mut view,
                        &mut next_image,
                        &mut show_fps,
                        &mut fullscreen,
                        fps,
                        is_loading,
                        status.as_deref(),
                        &window,
                    );
                });

                if let Some(path) = next_image {
                    is_loading = true;
                    loader::spawn_load(path, tx.clone());
                }

                match render_result {
                    Ok(_) => {}
                    Err(wgpu::SurfaceError::Lost) => renderer.resize(renderer.size),
                    Err(wgpu::SurfaceError::OutOfMemory) => *control_flow = ControlFlow::Exit,
                    Err(e) => log::error!("render error: {e:?}"),
                }
            }

            Event::MainEventsCleared => {
                window.request_redraw();
            }

            _ => {}
        }
    });
}

fn pick_image_file() -> Option<PathBuf> {
    rfd::FileDialog::new()
        .add_filter("Images", &["jpg", "jpeg", "png", "bmp"])
        .pick_file()
}

fn set_fullscreen(window: &winit::window::Window, on: bool) {
    if on {
        window.set_fullscreen(Some(Fullscreen::Borderless(None)));
    } else {
        window.set_fullscreen(None);
    }
}

fn draw_ui(
    ctx: &egui::Context,
    view: &mut PhotosphereView,
    next_image: &mut Option<PathBuf>,
    show_fps: &mut bool,
    fullscreen: &mut bool,
    fps: f32,
    is_loading: bool,
    status: Option<&str>,
    window: &winit::window::Window,
) {
    egui::TopBottomPanel::top("menu_bar").show(ctx, |ui| {
        egui::menu::bar(ui, |ui| {
            ui.menu_button("File", |ui| {
                if ui.button("Open image...").clicked() {
                    ui.close_menu();
                    if let Some(path) = pick_image_file() {
                        *next_image = Some(path);
                    }
                }
                if ui.button("Exit").clicked() {
                    std::process::exit(0);
                }
            });

            ui.menu_button("View", |ui| {
                if ui.button("Look below").clicked() {
                    view.on_reset_command();
                    ui.close_menu();
                }
                if ui.button("Rotate left 15°").clicked() {
                    view.on_rotate_command(-15.0);
                }
                if ui.button("Rotate right 15°").clicked() {
                    view.on_rotate_command(15.0);
                }

                ui.separator();
                let mut scale = view.controller.scale();
                let slider = egui::Slider::new(&mut scale, MIN_SCALE..=MAX_SCALE)
                    .logarithmic(true)
                    .text("Zoom");
                if ui.add(slider).changed() {
                    view.set_scale(scale);
                }

                ui.separator();
                if ui
                    .button(if *fullscreen {
                        "Exit fullscreen"
                    } else {
                        "Enter fullscreen"
                    })
                    .clicked()
                {
                    *fullscreen = !*fullscreen;
                    set_fullscreen(window, *fullscreen);
                    ui.close_menu();
                }
                ui.checkbox(show_fps, "Show FPS");
            });
        });
    });

    egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
        ui.horizontal(|ui| {
            if is_loading {
                ui.label(egui::RichText::new("Loading image...").color(egui::Color32::YELLOW));
                ui.label("|");
            }
            if let Some(message) = status {
                ui.label(egui::RichText::new(message).color(egui::Color32::LIGHT_RED));
                ui.label("|");
            }

            ui.label(format!("Zoom: {:.2}x", view.controller.scale()));

            if *show_fps {
                ui.label("|");
                ui.label(egui::RichText::new(format!("FPS: {fps:.1}")).color(egui::Color32::GREEN));
            }
        });
    });
}
