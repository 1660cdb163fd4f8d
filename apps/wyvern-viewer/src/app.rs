//! Viewer application implementation.

use glam::{Mat4, Quat, Vec3};
use tracing::{error, info};
use wyvern_app::{
    AppContext, FrameInfo, FrameUniforms, Mesh, MeshData, MeshDraw, Vertex, WyvernApp,
};

/// Cube rotation speed in radians per second.
const SPIN_SPEED: f32 = 0.8;

/// Camera position looking at the origin.
const EYE: Vec3 = Vec3::new(2.5, 2.0, 3.5);

const FOV_Y_DEGREES: f32 = 60.0;

/// Viewer application state.
pub struct Viewer {
    floor: Option<Mesh>,
    cube: Option<Mesh>,
    angle: f32,
}

/// The unit quad scaled up and laid flat under the cube.
fn floor_mesh() -> MeshData {
    let mut floor = MeshData::quad();
    let transform = Mat4::from_scale_rotation_translation(
        Vec3::splat(3.0),
        Quat::from_rotation_x(-std::f32::consts::FRAC_PI_2),
        Vec3::new(0.0, -0.75, 0.0),
    );
    for vertex in &mut floor.vertices {
        let position = transform.transform_point3(Vec3::from(vertex.position));
        *vertex = Vertex::new(position.to_array(), [0.3, 0.3, 0.35]);
    }
    floor
}

impl WyvernApp for Viewer {
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self> {
        let floor = ctx.renderer.upload_mesh(&floor_mesh(), "floor")?;
        let cube = ctx.renderer.upload_mesh(&MeshData::cube(), "cube")?;
        info!(
            "Uploaded floor ({} indices) and cube ({} indices)",
            floor.index_count, cube.index_count
        );

        Ok(Self {
            floor: Some(floor),
            cube: Some(cube),
            angle: 0.0,
        })
    }

    fn update(&mut self, _ctx: &AppContext, dt: f32) {
        self.angle = (self.angle + SPIN_SPEED * dt) % std::f32::consts::TAU;
    }

    fn render(&mut self, ctx: &mut AppContext, frame: &FrameInfo) -> anyhow::Result<()> {
        let aspect = frame.extent.width as f32 / frame.extent.height.max(1) as f32;
        let uniforms = FrameUniforms::look_at(
            Mat4::from_rotation_y(self.angle),
            EYE,
            Vec3::ZERO,
            FOV_Y_DEGREES.to_radians(),
            aspect,
            0.1,
            100.0,
        );
        ctx.renderer.update_frame_uniforms(&uniforms)?;

        let draws: Vec<MeshDraw<'_, _>> = [&self.floor, &self.cube]
            .into_iter()
            .flatten()
            .map(MeshDraw::new)
            .collect();
        ctx.renderer.draw_meshes(&draws)?;
        Ok(())
    }

    fn on_resize(&mut self, _ctx: &mut AppContext, width: u32, height: u32) -> anyhow::Result<()> {
        info!("Swapchain now {width}x{height}");
        Ok(())
    }

    fn cleanup(&mut self, ctx: &mut AppContext) {
        for mesh in [self.floor.take(), self.cube.take()].into_iter().flatten() {
            if let Err(e) = ctx.renderer.destroy_mesh(mesh) {
                error!("Failed to destroy mesh: {e}");
            }
        }
    }
}
