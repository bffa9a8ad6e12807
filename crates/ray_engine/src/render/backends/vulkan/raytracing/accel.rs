//! Acceleration structure construction
//!
//! Two lifecycles live here. A [`Blas`] is built once when a mesh is
//! uploaded and survives until the mesh is destroyed; its device address is
//! stable for that whole lifetime. A [`Tlas`] is rebuilt from scratch every
//! frame per logical scene from the instance list the scene collaborator
//! supplies; the previous generation is dropped only after its frame
//! slot's fence has been waited.
//!
//! All builds go through the blocking immediate-submit path, so a build's
//! transient instance and scratch buffers are safe to free as soon as the
//! submit call returns.

use ash::extensions::khr::AccelerationStructure;
use ash::vk;

use crate::foundation::math::{to_transform_rows, Mat4};
use crate::render::backends::vulkan::initialization::context::{VulkanContext, VulkanResult};
use crate::render::backends::vulkan::resources::allocator::MemoryResidency;
use crate::render::backends::vulkan::resources::buffer::GpuBuffer;
use crate::render::backends::vulkan::state::commands::ImmediateSubmit;

/// Where a mesh's triangles live inside the global geometry buffers
#[derive(Debug, Clone, Copy)]
pub struct MeshGeometry {
    /// First vertex, as an element index into the global vertex buffer
    pub vertex_offset: u32,
    /// Number of vertices
    pub vertex_count: u32,
    /// Size of one vertex in bytes
    pub vertex_stride: u32,
    /// First index, as an element index into the global index buffer
    pub index_offset: u32,
    /// Number of indices (three per triangle)
    pub index_count: u32,
}

impl MeshGeometry {
    /// Number of triangles described
    pub fn primitive_count(&self) -> u32 {
        self.index_count / 3
    }
}

/// Bottom-level acceleration structure over one mesh's triangles
pub struct Blas {
    accel_loader: AccelerationStructure,
    structure: vk::AccelerationStructureKHR,
    // Keeps the structure's backing memory alive
    _buffer: GpuBuffer,
    device_address: u64,
}

impl Blas {
    /// Build the structure for one mesh, blocking until the build completes
    ///
    /// Geometry is read straight out of the global vertex/index buffers at
    /// the offsets in `mesh`; nothing is copied.
    pub fn build(
        context: &VulkanContext,
        upload: &ImmediateSubmit,
        vertices: &GpuBuffer,
        indices: &GpuBuffer,
        mesh: &MeshGeometry,
    ) -> VulkanResult<Self> {
        let accel_loader = context.accel_loader().clone();

        let vertex_address =
            vertices.device_address() + u64::from(mesh.vertex_offset) * u64::from(mesh.vertex_stride);
        let index_address =
            indices.device_address() + u64::from(mesh.index_offset) * std::mem::size_of::<u32>() as u64;

        let triangles = vk::AccelerationStructureGeometryTrianglesDataKHR::builder()
            .vertex_format(vk::Format::R32G32B32_SFLOAT)
            .vertex_data(vk::DeviceOrHostAddressConstKHR {
                device_address: vertex_address,
            })
            .vertex_stride(u64::from(mesh.vertex_stride))
            .max_vertex(mesh.vertex_count.saturating_sub(1))
            .index_type(vk::IndexType::UINT32)
            .index_data(vk::DeviceOrHostAddressConstKHR {
                device_address: index_address,
            })
            .build();

        let geometry = vk::AccelerationStructureGeometryKHR::builder()
            .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
            .flags(vk::GeometryFlagsKHR::OPAQUE)
            .geometry(vk::AccelerationStructureGeometryDataKHR { triangles })
            .build();

        let primitive_count = mesh.primitive_count();

        let (structure, buffer, device_address) = build_structure(
            context,
            upload,
            &accel_loader,
            vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
            geometry,
            primitive_count,
        )?;

        log::debug!(
            "BLAS built: {} triangles, address 0x{:016x}",
            primitive_count,
            device_address
        );

        Ok(Self {
            accel_loader,
            structure,
            _buffer: buffer,
            device_address,
        })
    }

    /// Device address referenced by top-level instance records
    ///
    /// Stable for the lifetime of the mesh.
    pub fn device_address(&self) -> u64 {
        self.device_address
    }

    /// Structure handle
    pub fn handle(&self) -> vk::AccelerationStructureKHR {
        self.structure
    }
}

impl Drop for Blas {
    fn drop(&mut self) {
        unsafe {
            self.accel_loader
                .destroy_acceleration_structure(self.structure, None);
        }
    }
}

/// Top-level acceleration structure over one logical scene's instances
pub struct Tlas {
    accel_loader: AccelerationStructure,
    structure: vk::AccelerationStructureKHR,
    _buffer: GpuBuffer,
    device_address: u64,
    instance_count: u32,
}

impl Tlas {
    /// Rebuild a scene's structure from this frame's instance records
    ///
    /// Returns `Ok(None)` for an empty instance list: the rebuild is
    /// skipped entirely and the caller leaves that scene's slot unset, so
    /// the ray trace pass for it is skipped rather than tracing into a
    /// stale or dangling structure.
    pub fn rebuild(
        context: &VulkanContext,
        upload: &ImmediateSubmit,
        instances: &[vk::AccelerationStructureInstanceKHR],
    ) -> VulkanResult<Option<Self>> {
        if instances.is_empty() {
            return Ok(None);
        }
        Ok(Some(Self::build(context, upload, instances)?))
    }

    fn build(
        context: &VulkanContext,
        upload: &ImmediateSubmit,
        instances: &[vk::AccelerationStructureInstanceKHR],
    ) -> VulkanResult<Self> {
        let accel_loader = context.accel_loader().clone();
        let instance_count = instances.len() as u32;

        // Instance records are a fixed 64-byte wire format; upload them to
        // a transient host-visible buffer the build reads by address.
        let instance_bytes: &[u8] = unsafe {
            std::slice::from_raw_parts(
                instances.as_ptr().cast::<u8>(),
                std::mem::size_of_val(instances),
            )
        };

        let instance_buffer = GpuBuffer::from_data(
            context.raw_device(),
            context.allocator().clone(),
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            instance_bytes,
        )?;

        let instances_data = vk::AccelerationStructureGeometryInstancesDataKHR::builder()
            .array_of_pointers(false)
            .data(vk::DeviceOrHostAddressConstKHR {
                device_address: instance_buffer.device_address(),
            })
            .build();

        let geometry = vk::AccelerationStructureGeometryKHR::builder()
            .geometry_type(vk::GeometryTypeKHR::INSTANCES)
            .flags(vk::GeometryFlagsKHR::OPAQUE)
            .geometry(vk::AccelerationStructureGeometryDataKHR {
                instances: instances_data,
            })
            .build();

        let (structure, buffer, device_address) = build_structure(
            context,
            upload,
            &accel_loader,
            vk::AccelerationStructureTypeKHR::TOP_LEVEL,
            geometry,
            instance_count,
        )?;

        // The transient instance buffer drops here; the blocking submit
        // inside build_structure already guaranteed the GPU is done with it.
        Ok(Self {
            accel_loader,
            structure,
            _buffer: buffer,
            device_address,
            instance_count,
        })
    }

    /// Structure handle for descriptor updates
    pub fn handle(&self) -> vk::AccelerationStructureKHR {
        self.structure
    }

    /// Device address of the structure
    pub fn device_address(&self) -> u64 {
        self.device_address
    }

    /// Number of instances this generation was built from
    pub fn instance_count(&self) -> u32 {
        self.instance_count
    }
}

impl Drop for Tlas {
    fn drop(&mut self) {
        unsafe {
            self.accel_loader
                .destroy_acceleration_structure(self.structure, None);
        }
    }
}

/// Shared tail of both build paths: size query, buffers, structure, build
fn build_structure(
    context: &VulkanContext,
    upload: &ImmediateSubmit,
    accel_loader: &AccelerationStructure,
    ty: vk::AccelerationStructureTypeKHR,
    geometry: vk::AccelerationStructureGeometryKHR,
    primitive_count: u32,
) -> VulkanResult<(vk::AccelerationStructureKHR, GpuBuffer, u64)> {
    let geometries = [geometry];

    let size_query_info = vk::AccelerationStructureBuildGeometryInfoKHR::builder()
        .ty(ty)
        .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE)
        .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
        .geometries(&geometries);

    let build_sizes = unsafe {
        accel_loader.get_acceleration_structure_build_sizes(
            vk::AccelerationStructureBuildTypeKHR::DEVICE,
            &size_query_info,
            &[primitive_count],
        )
    };

    log::debug!(
        "{:?} build sizes: structure={}, scratch={}",
        ty,
        build_sizes.acceleration_structure_size,
        build_sizes.build_scratch_size
    );

    let buffer = GpuBuffer::new(
        context.raw_device(),
        context.allocator().clone(),
        build_sizes.acceleration_structure_size,
        vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR
            | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
        MemoryResidency::DeviceLocal,
    )?;

    let create_info = vk::AccelerationStructureCreateInfoKHR::builder()
        .buffer(buffer.handle())
        .offset(0)
        .size(build_sizes.acceleration_structure_size)
        .ty(ty);

    let structure = unsafe {
        accel_loader
            .create_acceleration_structure(&create_info, None)
            .map_err(crate::render::backends::vulkan::VulkanError::from_vk)?
    };

    let scratch_buffer = GpuBuffer::new(
        context.raw_device(),
        context.allocator().clone(),
        build_sizes.build_scratch_size,
        vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
        MemoryResidency::DeviceLocal,
    )?;

    let build_info = vk::AccelerationStructureBuildGeometryInfoKHR::builder()
        .ty(ty)
        .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE)
        .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
        .dst_acceleration_structure(structure)
        .geometries(&geometries)
        .scratch_data(vk::DeviceOrHostAddressKHR {
            device_address: scratch_buffer.device_address(),
        })
        .build();

    let build_range = vk::AccelerationStructureBuildRangeInfoKHR::builder()
        .primitive_count(primitive_count)
        .primitive_offset(0)
        .first_vertex(0)
        .transform_offset(0)
        .build();

    let device = context.raw_device();
    upload.submit(|cmd| {
        unsafe {
            accel_loader.cmd_build_acceleration_structures(
                cmd,
                &[build_info],
                &[std::slice::from_ref(&build_range)],
            );

            // Make the build visible to trace calls recorded later in the
            // same queue without relying solely on the fence wait.
            let barrier = vk::MemoryBarrier::builder()
                .src_access_mask(vk::AccessFlags::ACCELERATION_STRUCTURE_WRITE_KHR)
                .dst_access_mask(
                    vk::AccessFlags::ACCELERATION_STRUCTURE_READ_KHR
                        | vk::AccessFlags::SHADER_READ,
                )
                .build();
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD_KHR,
                vk::PipelineStageFlags::RAY_TRACING_SHADER_KHR,
                vk::DependencyFlags::empty(),
                &[barrier],
                &[],
                &[],
            );
        }
    })?;

    let address_info =
        vk::AccelerationStructureDeviceAddressInfoKHR::builder().acceleration_structure(structure);
    let device_address =
        unsafe { accel_loader.get_acceleration_structure_device_address(&address_info) };

    // Scratch drops here, after the blocking submit
    drop(scratch_buffer);

    Ok((structure, buffer, device_address))
}

/// Pack one instance into the fixed 64-byte record the TLAS build consumes
///
/// `custom_index` is the position in the frame's instance list; the pick
/// shader reports it back so the scene collaborator can resolve the hit.
pub fn instance_record(
    transform: &Mat4,
    custom_index: u32,
    blas_address: u64,
) -> vk::AccelerationStructureInstanceKHR {
    let rows = to_transform_rows(transform);
    vk::AccelerationStructureInstanceKHR {
        transform: vk::TransformMatrixKHR { matrix: rows },
        instance_custom_index_and_mask: vk::Packed24_8::new(custom_index, 0xff),
        instance_shader_binding_table_record_offset_and_flags: vk::Packed24_8::new(
            0,
            vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE.as_raw() as u8,
        ),
        acceleration_structure_reference: vk::AccelerationStructureReferenceKHR {
            device_handle: blas_address,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec3;

    #[test]
    fn test_primitive_count() {
        let mesh = MeshGeometry {
            vertex_offset: 0,
            vertex_count: 8,
            vertex_stride: 32,
            index_offset: 0,
            index_count: 36,
        };
        assert_eq!(mesh.primitive_count(), 12);
    }

    #[test]
    fn test_instance_record_packing() {
        let record = instance_record(&Mat4::identity(), 7, 0xdead_beef);

        assert_eq!(record.instance_custom_index_and_mask.low_24(), 7);
        assert_eq!(record.instance_custom_index_and_mask.high_8(), 0xff);
        assert_eq!(unsafe { record.acceleration_structure_reference.device_handle }, 0xdead_beef);

        // Identity rotation rows with zero translation
        assert_eq!(record.transform.matrix[0], 1.0);
        assert_eq!(record.transform.matrix[5], 1.0);
        assert_eq!(record.transform.matrix[10], 1.0);
    }

    #[test]
    fn test_instance_record_translation() {
        let transform = Mat4::new_translation(&Vec3::new(4.0, 5.0, 6.0));
        let record = instance_record(&transform, 0, 1);
        assert_eq!(record.transform.matrix[3], 4.0);
        assert_eq!(record.transform.matrix[7], 5.0);
        assert_eq!(record.transform.matrix[11], 6.0);
    }

    #[test]
    fn test_instance_record_is_wire_sized() {
        // The TLAS build consumes a fixed 64-byte record
        assert_eq!(std::mem::size_of::<vk::AccelerationStructureInstanceKHR>(), 64);
    }
}
