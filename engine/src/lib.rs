use anyhow::{Ok, Result};
use renderer::Renderer;
use winit::dpi::LogicalSize;
use winit::event::{Event, WindowEvent};
use winit::event_loop::EventLoop;
use winit::window::{Window, WindowBuilder};

mod renderer;
mod vulkan;

use vulkan::constants;

#[derive(Debug)]
pub struct Engine {
    window: Window,
    renderer: Renderer,
    event_loop: EventLoop<()>,
}

impl Engine {
    pub fn new() -> Result<Engine> {
        // Window
        let event_loop = EventLoop::new()?;
        let window = WindowBuilder::new()
            .with_title(constants::WINDOW_TITLE)
            .with_inner_size(LogicalSize::new(
                constants::WINDOW_WIDTH,
                constants::WINDOW_HEIGHT,
            ))
            .build(&event_loop)?;

        let renderer = unsafe { Renderer::create(&window)? };

        Ok(Engine {
            window,
            renderer,
            event_loop,
        })
    }

    pub fn run(mut self) -> Result<()> {
        self.event_loop.run(move |event, elwt| match event {
            // There is no frame loop; redraw requests keep the window
            // responsive until the renderer grows one.
            Event::AboutToWait => self.window.request_redraw(),
            Event::WindowEvent { event, .. } => {
                if let WindowEvent::CloseRequested = event {
                    elwt.exit();
                    unsafe {
                        self.renderer.destroy();
                    }
                }
            }
            _ => {}
        })?;

        Ok(())
    }
}
